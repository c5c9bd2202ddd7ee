//! Event types for job progress streaming

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Job, JobStatus, TaskStatus};
use crate::state::ReconcileReason;

/// Counters snapshot carried by progress events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub successful_count: u32,
    pub failed_count: u32,
    pub not_found_count: u32,
    pub total: u32,
    /// Completion percentage, one decimal place
    pub percentage: f64,
    pub message: String,
}

impl Progress {
    pub fn from_job(job: &Job, message: impl Into<String>) -> Self {
        Self {
            successful_count: job.successful_count,
            failed_count: job.failed_count,
            not_found_count: job.not_found_count,
            total: job.total,
            percentage: job.progress_percentage(),
            message: message.into(),
        }
    }
}

/// Everything observable about job execution.
///
/// Delivery is at-least-once; consumers must tolerate duplicates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JobEvent {
    /// A job and its tasks were stored
    JobSubmitted { job_id: String, name: String, total: u32 },

    /// A job changed status
    JobStatusChanged {
        job_id: String,
        status: JobStatus,
        progress: Progress,
    },

    /// A task reached its final status for this run
    TaskFinalized {
        job_id: String,
        target: String,
        task_status: TaskStatus,
        progress: Progress,
    },

    /// The recovery service corrected a stale job
    JobReconciled {
        job_id: String,
        status: JobStatus,
        reason: ReconcileReason,
        detail: String,
        progress: Progress,
    },

    /// Something went wrong that did not change job status
    Warning { job_id: String, message: String },
}

impl JobEvent {
    /// Get the job ID for this event
    pub fn job_id(&self) -> &str {
        match self {
            Self::JobSubmitted { job_id, .. }
            | Self::JobStatusChanged { job_id, .. }
            | Self::TaskFinalized { job_id, .. }
            | Self::JobReconciled { job_id, .. }
            | Self::Warning { job_id, .. } => job_id,
        }
    }

    /// Get a short name for the event type
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::JobSubmitted { .. } => "JobSubmitted",
            Self::JobStatusChanged { .. } => "JobStatusChanged",
            Self::TaskFinalized { .. } => "TaskFinalized",
            Self::JobReconciled { .. } => "JobReconciled",
            Self::Warning { .. } => "Warning",
        }
    }

    /// Whether this event ends the job's current run
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::JobStatusChanged { status, .. } | Self::JobReconciled { status, .. } => status.is_terminal(),
            _ => false,
        }
    }
}

/// Wrapper for persisted events with timestamp
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventLogEntry {
    /// Timestamp of the event
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    /// The event
    pub event: JobEvent,
}

impl EventLogEntry {
    /// Create a new log entry with current timestamp
    pub fn new(event: JobEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_job_id_and_type() {
        let event = JobEvent::Warning {
            job_id: "job-1".to_string(),
            message: "slow".to_string(),
        };
        assert_eq!(event.job_id(), "job-1");
        assert_eq!(event.event_type(), "Warning");
        assert!(!event.is_terminal());
    }

    #[test]
    fn test_progress_from_job() {
        let mut job = Job::with_id("job-1", "t", 1, 60);
        job.total = 4;
        job.record_outcome(TaskStatus::Success);
        job.record_outcome(TaskStatus::NotFound);
        let progress = Progress::from_job(&job, "2 of 4");
        assert_eq!(progress.successful_count, 1);
        assert_eq!(progress.not_found_count, 1);
        assert_eq!(progress.percentage, 50.0);
    }

    #[test]
    fn test_log_entry_serialization() {
        let entry = EventLogEntry::new(JobEvent::JobReconciled {
            job_id: "job-1".to_string(),
            status: JobStatus::Failed,
            reason: ReconcileReason::OwnerDead,
            detail: "owner process 7 is gone".to_string(),
            progress: Progress::from_job(&Job::new("funds", 1, 60), "owner process 7 is gone"),
        });
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"ts\""));
        assert!(json.contains("\"type\":\"JobReconciled\""));
        assert!(json.contains("\"reason\":\"owner_dead\""));
        let parsed: EventLogEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, entry);
        assert!(parsed.event.is_terminal());
    }
}
