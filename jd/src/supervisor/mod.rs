//! Process supervision
//!
//! Single-instance locking, liveness probing, and reclamation of the
//! collaborator processes that sessions leave behind.

mod config;
mod lock;
mod monitor;
mod probe;
mod registry;

pub use config::SupervisorConfig;
pub use lock::{LOCK_FILE_NAME, LockError, LockGuard, LockInfo, ProcessLock};
pub use monitor::{JobActivity, MonitorReport, SupervisorMonitor};
pub use probe::{ProcessProbe, SignalProbe, local_hostname};
pub use registry::{CleanupHook, ProcessRegistry};

#[cfg(test)]
pub(crate) use probe::testing;
