//! State management with actor pattern
//!
//! StateManager owns the Store and processes messages via channels,
//! providing serialized access to persistent state.

mod manager;
mod messages;
mod recovery;

pub use manager::{StateEvent, StateManager};
pub use messages::{JobChange, StateCommand, StateError, StateResponse};
pub use recovery::{ReconcileReason, Reconciliation, RecoveryConfig, RecoveryService};
