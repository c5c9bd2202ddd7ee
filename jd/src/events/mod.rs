//! Progress events
//!
//! The coordinator emits a [`JobEvent`] after every task finalization and
//! every job status change. Consumers (the JSONL logger, IPC clients)
//! subscribe to the [`EventBus`].
//!
//! ```text
//!   JobCoordinator ──emit──▶ EventBus (broadcast) ──▶ EventLogger ─▶ events/<job-id>.jsonl
//!                                                 └─▶ other subscribers
//! ```
//!
//! Delivery is at-least-once: a lagging subscriber may miss events, and a
//! reconciled job may be reported by both the pool and the recovery pass.

mod bus;
mod logger;
mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, EventEmitter};
pub use logger::{EventLogger, read_job_events, spawn_event_logger};
pub use types::{EventLogEntry, JobEvent, Progress};
