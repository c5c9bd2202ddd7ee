//! Task domain type
//!
//! One target processed within a Job.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::id::generate_task_id;
use super::{ParseStatusError, now_ms};

/// Task status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for dispatch
    #[default]
    Pending,
    /// Dispatched to a worker slot
    Processing,
    /// Session returned a result
    Success,
    /// Retries exhausted or terminal error
    Failed,
    /// Target does not exist
    NotFound,
    /// Interrupted by shutdown before finishing
    Cancelled,
}

impl TaskStatus {
    /// All statuses, in lifecycle order
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Pending,
        TaskStatus::Processing,
        TaskStatus::Success,
        TaskStatus::Failed,
        TaskStatus::NotFound,
        TaskStatus::Cancelled,
    ];

    /// Whether no further work will happen on this task without a reset
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::NotFound | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::NotFound => "not_found",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "not_found" => Ok(Self::NotFound),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(ParseStatusError(s.to_string())),
        }
    }
}

/// One target within a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier
    pub id: String,

    /// Owning job
    pub job_id: String,

    /// Opaque target key handed to the session driver
    pub target: String,

    /// Submission order within the job (0-based)
    pub position: u32,

    /// Current status
    pub status: TaskStatus,

    /// Human-readable detail of the last failure
    pub error_detail: Option<String>,

    /// Retries scheduled so far
    pub retry_count: u32,

    /// Session attempts made so far
    pub attempts: u32,

    /// Short description of the extracted result (e.g. entity name)
    pub result_summary: Option<String>,

    /// Number of result records stored on success
    pub record_count: u32,

    /// When the task was last dispatched (Unix milliseconds)
    pub started_at: Option<i64>,

    /// When the task was finalized (Unix milliseconds)
    pub completed_at: Option<i64>,

    /// Last update timestamp (Unix milliseconds)
    pub updated_at: i64,
}

impl Task {
    /// Create a new pending task
    pub fn new(job_id: impl Into<String>, target: impl Into<String>, position: u32) -> Self {
        Self {
            id: generate_task_id(),
            job_id: job_id.into(),
            target: target.into(),
            position,
            status: TaskStatus::Pending,
            error_detail: None,
            retry_count: 0,
            attempts: 0,
            result_summary: None,
            record_count: 0,
            started_at: None,
            completed_at: None,
            updated_at: now_ms(),
        }
    }

    /// Transition to processing on dispatch
    pub fn mark_processing(&mut self) {
        debug!(%self.id, %self.target, "Task::mark_processing: called");
        let now = now_ms();
        self.status = TaskStatus::Processing;
        self.started_at = Some(now);
        self.updated_at = now;
    }

    /// Finalize as success with a result summary
    pub fn finalize_success(&mut self, summary: impl Into<String>, record_count: u32) {
        debug!(%self.id, record_count, "Task::finalize_success: called");
        let now = now_ms();
        self.status = TaskStatus::Success;
        self.result_summary = Some(summary.into());
        self.record_count = record_count;
        self.error_detail = None;
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    /// Finalize with a non-success terminal status and detail
    pub fn finalize_failure(&mut self, status: TaskStatus, detail: impl Into<String>) {
        let detail = detail.into();
        debug!(%self.id, ?status, %detail, "Task::finalize_failure: called");
        let now = now_ms();
        self.status = status;
        self.error_detail = Some(detail);
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    /// Return the task to the pending queue, clearing error detail
    pub fn reset_to_pending(&mut self) {
        debug!(%self.id, from = ?self.status, "Task::reset_to_pending: called");
        self.status = TaskStatus::Pending;
        self.error_detail = None;
        self.completed_at = None;
        self.updated_at = now_ms();
    }

    /// Check if the task is in a terminal state
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_new() {
        let task = Task::new("job-1", "12.345.678/0001-90", 3);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.position, 3);
        assert_eq!(task.retry_count, 0);
        assert!(task.result_summary.is_none());
    }

    #[test]
    fn test_status_roundtrip() {
        for status in TaskStatus::ALL {
            let parsed: TaskStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
        assert!(TaskStatus::Success.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::NotFound.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_success_requires_summary() {
        let mut task = Task::new("job-1", "t", 0);
        task.mark_processing();
        task.finalize_success("Fund A", 12);
        assert_eq!(task.status, TaskStatus::Success);
        assert_eq!(task.result_summary.as_deref(), Some("Fund A"));
        assert_eq!(task.record_count, 12);
        assert!(task.completed_at.is_some());
    }

    #[test]
    fn test_reset_clears_error() {
        let mut task = Task::new("job-1", "t", 0);
        task.finalize_failure(TaskStatus::Failed, "timeout");
        task.retry_count = 2;
        task.reset_to_pending();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.error_detail.is_none());
        assert!(task.completed_at.is_none());
        assert_eq!(task.retry_count, 2);
    }

    #[test]
    fn test_serialization_not_found() {
        let mut task = Task::new("job-1", "t", 0);
        task.finalize_failure(TaskStatus::NotFound, "no such target");
        let json = serde_json::to_string(&task).unwrap();
        assert!(json.contains("\"status\":\"not_found\""));
    }
}
