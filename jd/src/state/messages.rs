//! State manager messages
//!
//! Commands and responses for the actor pattern.

use thiserror::Error;
use tokio::sync::oneshot;

use crate::domain::{Job, JobStatus, ResultRecord, Task, TaskStatus};
use crate::store::{StoreError, StoreStats, TaskCounts};

/// Errors from state operations
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Channel error")]
    ChannelError,
}

/// Response from state operations
pub type StateResponse<T> = Result<T, StateError>;

/// A status change applied to a job inside the actor.
///
/// Legality is checked against the stored status at apply time, so two
/// writers racing on the same job cannot both win.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobChange {
    /// Enter `running` owned by `pid`@`hostname`.
    ///
    /// Tasks left `processing` or `cancelled` go back to `pending`. With
    /// `reset_failed`, `failed` tasks do too and the failed counter restarts.
    Start {
        pid: u32,
        hostname: String,
        reset_failed: bool,
    },
    Complete,
    Fail {
        reason: String,
    },
    Cancel,
}

impl JobChange {
    /// Status the job ends up in
    pub fn target_status(&self) -> JobStatus {
        match self {
            Self::Start { .. } => JobStatus::Running,
            Self::Complete => JobStatus::Completed,
            Self::Fail { .. } => JobStatus::Failed,
            Self::Cancel => JobStatus::Cancelled,
        }
    }
}

/// Commands sent to the StateManager actor
#[derive(Debug)]
pub enum StateCommand {
    // Job operations
    CreateJob {
        job: Job,
        tasks: Vec<Task>,
        reply: oneshot::Sender<StateResponse<String>>,
    },
    GetJob {
        id: String,
        reply: oneshot::Sender<StateResponse<Option<Job>>>,
    },
    ListJobs {
        status_filter: Option<JobStatus>,
        reply: oneshot::Sender<StateResponse<Vec<Job>>>,
    },
    ApplyJobChange {
        id: String,
        change: JobChange,
        reply: oneshot::Sender<StateResponse<Option<Job>>>,
    },
    SetOutputFile {
        id: String,
        path: String,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    // Task operations
    ListTasks {
        job_id: String,
        statuses: Vec<TaskStatus>,
        reply: oneshot::Sender<StateResponse<Vec<Task>>>,
    },
    UpdateTask {
        task: Task,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    FinalizeTask {
        task: Task,
        records: Vec<ResultRecord>,
        reply: oneshot::Sender<StateResponse<Option<Job>>>,
    },
    CountTasks {
        job_id: String,
        reply: oneshot::Sender<StateResponse<TaskCounts>>,
    },

    // Results
    ListResults {
        job_id: String,
        reply: oneshot::Sender<StateResponse<Vec<ResultRecord>>>,
    },

    // Aggregates
    Stats {
        reply: oneshot::Sender<StateResponse<StoreStats>>,
    },

    // Shutdown
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_change_target_status() {
        let start = JobChange::Start {
            pid: 1,
            hostname: "h".to_string(),
            reset_failed: false,
        };
        assert_eq!(start.target_status(), JobStatus::Running);
        assert_eq!(JobChange::Complete.target_status(), JobStatus::Completed);
        assert_eq!(
            JobChange::Fail { reason: "x".to_string() }.target_status(),
            JobStatus::Failed
        );
        assert_eq!(JobChange::Cancel.target_status(), JobStatus::Cancelled);
    }
}
