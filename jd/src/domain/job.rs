//! Job domain type
//!
//! A Job is one batch of Tasks run under a single worker-pool configuration.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::id::generate_id;
use super::task::TaskStatus;
use super::{ParseStatusError, now_ms};

/// Job status
///
/// Lifecycle: `pending -> running -> {completed, failed, cancelled}`. A finished
/// job may re-enter `running` (start again or retry failed tasks) but never
/// returns to `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Submitted, never started
    #[default]
    Pending,
    /// Owned by a live orchestrating process
    Running,
    /// Every task reached a terminal status
    Completed,
    /// Pre-flight failure, timeout, or dead owner
    Failed,
    /// Cancelled by a user while running
    Cancelled,
}

impl JobStatus {
    /// All statuses, in lifecycle order
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    /// Whether the status is final for the current run
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether `next` is a legal transition from this status
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        debug!(from = ?self, to = ?next, "JobStatus::can_transition_to: called");
        match (self, next) {
            (Self::Pending, Self::Running) => true,
            (Self::Running, Self::Completed | Self::Failed | Self::Cancelled) => true,
            (Self::Completed | Self::Failed | Self::Cancelled, Self::Running) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "JobStatus::from_str: called");
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" | "complete" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            _ => {
                debug!(%s, "JobStatus::from_str: unknown status");
                Err(ParseStatusError(s.to_string()))
            }
        }
    }
}

/// A batch of targets processed together
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier
    pub id: String,

    /// Display name (source file or label)
    pub name: String,

    /// Current status
    pub status: JobStatus,

    /// Worker slots used when running
    pub workers: usize,

    /// Number of tasks in the job
    pub total: u32,

    /// Tasks finalized as success
    pub successful_count: u32,

    /// Tasks finalized as failed
    pub failed_count: u32,

    /// Tasks finalized as not_found
    pub not_found_count: u32,

    /// Wall-clock budget for one run, checked by the recovery service
    pub timeout_secs: u64,

    /// PID of the owning orchestrator while running
    pub pid: Option<u32>,

    /// Host of the owning orchestrator while running
    pub hostname: Option<String>,

    /// Path of the aggregated result artifact
    pub output_file: Option<String>,

    /// Why the job failed (pre-flight, timeout, dead owner, ...)
    pub failure_reason: Option<String>,

    /// Creation timestamp (Unix milliseconds)
    pub created_at: i64,

    /// Start of the current run (Unix milliseconds)
    pub started_at: Option<i64>,

    /// End of the last run (Unix milliseconds)
    pub completed_at: Option<i64>,

    /// Last update timestamp (Unix milliseconds)
    pub updated_at: i64,
}

impl Job {
    /// Create a new pending job with a generated ID
    pub fn new(name: impl Into<String>, workers: usize, timeout_secs: u64) -> Self {
        let name = name.into();
        debug!(%name, workers, timeout_secs, "Job::new: called");
        let id = generate_id("job", &name);
        Self::with_id(id, name, workers, timeout_secs)
    }

    /// Create with a specific ID (for testing or import)
    pub fn with_id(id: impl Into<String>, name: impl Into<String>, workers: usize, timeout_secs: u64) -> Self {
        let now = now_ms();
        Self {
            id: id.into(),
            name: name.into(),
            status: JobStatus::Pending,
            workers,
            total: 0,
            successful_count: 0,
            failed_count: 0,
            not_found_count: 0,
            timeout_secs,
            pid: None,
            hostname: None,
            output_file: None,
            failure_reason: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }

    /// Apply a status transition, maintaining timestamps.
    ///
    /// Returns false (and leaves the job untouched) if the transition is illegal.
    pub fn transition(&mut self, next: JobStatus) -> bool {
        debug!(%self.id, from = ?self.status, to = ?next, "Job::transition: called");
        if !self.status.can_transition_to(next) {
            debug!(%self.id, "Job::transition: rejected");
            return false;
        }
        let now = now_ms();
        match next {
            JobStatus::Running => {
                self.started_at = Some(now);
                self.completed_at = None;
                self.failure_reason = None;
            }
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => {
                self.completed_at = Some(now);
            }
            JobStatus::Pending => {}
        }
        self.status = next;
        self.updated_at = now;
        true
    }

    /// Enter `running`, recording the owning process
    pub fn mark_running(&mut self, pid: u32, hostname: impl Into<String>) -> bool {
        debug!(%self.id, pid, "Job::mark_running: called");
        if !self.transition(JobStatus::Running) {
            return false;
        }
        self.pid = Some(pid);
        self.hostname = Some(hostname.into());
        true
    }

    /// Enter `failed` with a reason
    pub fn mark_failed(&mut self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        debug!(%self.id, %reason, "Job::mark_failed: called");
        if !self.transition(JobStatus::Failed) {
            return false;
        }
        self.failure_reason = Some(reason);
        true
    }

    /// Count a finalized task outcome
    pub fn record_outcome(&mut self, status: TaskStatus) {
        debug!(%self.id, ?status, "Job::record_outcome: called");
        match status {
            TaskStatus::Success => self.successful_count += 1,
            TaskStatus::Failed => self.failed_count += 1,
            TaskStatus::NotFound => self.not_found_count += 1,
            TaskStatus::Pending | TaskStatus::Processing | TaskStatus::Cancelled => {
                debug!(?status, "Job::record_outcome: not a counted outcome");
            }
        }
        self.updated_at = now_ms();
    }

    /// Tasks finalized so far (success, failed, or not_found)
    pub fn processed(&self) -> u32 {
        self.successful_count + self.failed_count + self.not_found_count
    }

    /// Completion percentage rounded to one decimal place
    pub fn progress_percentage(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let pct = f64::from(self.processed()) / f64::from(self.total) * 100.0;
        (pct * 10.0).round() / 10.0
    }

    /// Check if the job is in a terminal state
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Check if the job is running
    pub fn is_running(&self) -> bool {
        self.status == JobStatus::Running
    }

    /// Milliseconds the current run has been going, if started
    pub fn elapsed_ms(&self, now: i64) -> Option<i64> {
        self.started_at.map(|started| now.saturating_sub(started))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_new_defaults() {
        let job = Job::new("funds.txt", 4, 7200);
        assert!(job.id.contains("-job-"));
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.workers, 4);
        assert!(job.started_at.is_none());
        assert!(job.pid.is_none());
    }

    #[test]
    fn test_status_display_roundtrip() {
        for status in JobStatus::ALL {
            let parsed: JobStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("bogus".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_never_returns_to_pending() {
        for status in JobStatus::ALL {
            assert!(!status.can_transition_to(JobStatus::Pending));
        }
    }

    #[test]
    fn test_pending_can_only_start() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Cancelled));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Failed));
    }

    #[test]
    fn test_mark_running_sets_owner_and_start() {
        let mut job = Job::with_id("j1", "test", 2, 60);
        assert!(job.mark_running(42, "host-a"));
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.pid, Some(42));
        assert_eq!(job.hostname.as_deref(), Some("host-a"));
        assert!(job.started_at.is_some());
        assert!(job.completed_at.is_none());
    }

    #[test]
    fn test_running_twice_is_rejected() {
        let mut job = Job::with_id("j1", "test", 2, 60);
        assert!(job.mark_running(1, "h"));
        assert!(!job.mark_running(2, "h"));
        assert_eq!(job.pid, Some(1));
    }

    #[test]
    fn test_mark_failed_records_reason() {
        let mut job = Job::with_id("j1", "test", 2, 60);
        job.mark_running(1, "h");
        assert!(job.mark_failed("pre-flight failed"));
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.failure_reason.as_deref(), Some("pre-flight failed"));
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn test_rerun_clears_failure_reason() {
        let mut job = Job::with_id("j1", "test", 2, 60);
        job.mark_running(1, "h");
        job.mark_failed("timeout");
        assert!(job.mark_running(2, "h"));
        assert!(job.failure_reason.is_none());
        assert!(job.completed_at.is_none());
    }

    #[test]
    fn test_progress_percentage() {
        let mut job = Job::with_id("j1", "test", 2, 60);
        assert_eq!(job.progress_percentage(), 0.0);
        job.total = 3;
        job.record_outcome(TaskStatus::Success);
        assert_eq!(job.progress_percentage(), 33.3);
        job.record_outcome(TaskStatus::NotFound);
        job.record_outcome(TaskStatus::Failed);
        assert_eq!(job.progress_percentage(), 100.0);
        assert_eq!(job.successful_count, 1);
        assert_eq!(job.failed_count, 1);
        assert_eq!(job.not_found_count, 1);
    }

    #[test]
    fn test_record_outcome_ignores_non_final() {
        let mut job = Job::with_id("j1", "test", 2, 60);
        job.record_outcome(TaskStatus::Processing);
        job.record_outcome(TaskStatus::Cancelled);
        assert_eq!(job.processed(), 0);
    }

    #[test]
    fn test_serialization_uses_snake_case_status() {
        let mut job = Job::with_id("j1", "test", 2, 60);
        job.mark_running(1, "h");
        let json = serde_json::to_string(&job).unwrap();
        assert!(json.contains("\"status\":\"running\""));
        let parsed: Job = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, job);
    }
}
