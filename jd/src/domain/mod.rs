//! Domain types for JobDaemon
//!
//! Core domain types: Job, Task, ResultRecord.
//! The store persists them; only the coordinator and the recovery service
//! change their status.

mod id;
mod job;
mod result;
mod task;

pub use id::{generate_id, generate_task_id};
pub use job::{Job, JobStatus};
pub use result::{ResultPoint, ResultRecord};
pub use task::{Task, TaskStatus};

/// Current time as Unix milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Error returned when a status string does not name a known status
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown status '{0}'")]
pub struct ParseStatusError(pub String);
