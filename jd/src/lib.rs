//! JobDaemon - rate-limited, crash-recovering batch orchestrator
//!
//! JobDaemon turns a list of targets into a supervised batch: each target is
//! driven through an external, possibly flaky automation session, under a
//! global request budget, with retries, crash detection, and resumable
//! progress.
//!
//! # Core Concepts
//!
//! - **Jobs and Tasks**: a job is a batch of targets; each target is a task
//! - **One Session per Attempt**: a crashed session is never reused
//! - **State in SQLite**: progress survives restarts; recovery finishes or fails stale jobs
//! - **Single Writer**: the coordinator owns job transitions; workers only propose
//!
//! # Modules
//!
//! - [`scheduler`] - Sliding-window rate limiter and worker limits
//! - [`retry`] - Backoff policy and outcome classification
//! - [`driver`] - Session driver trait and the command adapter
//! - [`pool`] - Bounded worker pool with pre-flight and cancellation
//! - [`coordinator`] - Job state machine and administrative operations
//! - [`state`] - Store actor and recovery service
//! - [`supervisor`] - Process lock, liveness probing, orphan reaping
//! - [`ipc`] - Administrative socket protocol
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod config;
pub mod coordinator;
pub mod daemon;
pub mod domain;
pub mod driver;
pub mod events;
pub mod export;
pub mod ipc;
pub mod pool;
pub mod retry;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod supervisor;

// Re-export commonly used types
pub use config::Config;
pub use coordinator::{
    ActiveJob, CoordinatorDeps, CoordinatorError, CoordinatorSettings, HealthReport, JobCoordinator, JobDetail, Owner,
};
pub use domain::{Job, JobStatus, ResultPoint, ResultRecord, Task, TaskStatus};
pub use driver::{CommandDriverFactory, DriverConfig, DriverError, SessionDriver, SessionFactory, SessionOutcome};
pub use events::{EventBus, EventEmitter, EventLogger, JobEvent, Progress, spawn_event_logger};
pub use pool::{CancelToken, PoolConfig, PoolContext, PoolError, Proposal, WorkerPool};
pub use retry::{Classification, Decision, ErrorCategory, RetryConfig, RetryPolicy};
pub use scheduler::{RateLimiter, SchedulerConfig};
pub use state::{JobChange, Reconciliation, RecoveryConfig, RecoveryService, StateError, StateManager};
pub use supervisor::{CleanupHook, JobActivity, ProcessLock, ProcessProbe, ProcessRegistry, SignalProbe, SupervisorMonitor};
