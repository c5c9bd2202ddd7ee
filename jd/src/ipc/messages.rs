//! IPC message types for daemon communication
//!
//! Simple JSON-over-newline protocol. Each message is a single line of JSON followed by `\n`.

use serde::{Deserialize, Serialize};

use crate::coordinator::{CoordinatorError, HealthReport, JobDetail};
use crate::domain::{Job, JobStatus, Task};
use crate::state::Reconciliation;
use crate::store::StoreStats;

/// Requests from the CLI to the daemon
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum DaemonRequest {
    /// Ping to check if daemon is alive
    Ping,

    /// Request daemon to stop gracefully
    Shutdown,

    /// Store a new pending job
    Submit {
        name: String,
        targets: Vec<String>,
        #[serde(default)]
        workers: Option<usize>,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },

    ListJobs {
        #[serde(default)]
        status: Option<JobStatus>,
    },

    GetJob { id: String },

    FailedTasks { id: String },

    Start { id: String },

    Cancel { id: String },

    RetryFailed { id: String },

    /// Run a recovery pass now
    Reconcile,

    Health,

    Stats,
}

impl DaemonRequest {
    /// Whether answering may wait on a worker pre-flight
    pub fn runs_preflight(&self) -> bool {
        matches!(self, Self::Start { .. } | Self::RetryFailed { .. })
    }
}

/// Broad class of a failed request
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    InvalidState,
    InvalidInput,
    Internal,
}

impl From<&CoordinatorError> for ErrorKind {
    fn from(err: &CoordinatorError) -> Self {
        match err {
            CoordinatorError::NotFound(_) => Self::NotFound,
            CoordinatorError::InvalidState(_) | CoordinatorError::NothingToRetry(_) => Self::InvalidState,
            CoordinatorError::DuplicateTarget(_) | CoordinatorError::NoTargets | CoordinatorError::BlankTarget(_) => {
                Self::InvalidInput
            }
            CoordinatorError::PreflightFailed(_) | CoordinatorError::Export(_) | CoordinatorError::State(_) => {
                Self::Internal
            }
        }
    }
}

/// Responses from the daemon to the CLI
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum DaemonResponse {
    /// Acknowledgment
    Ok,

    /// Pong response to ping
    Pong { version: String, pid: u32 },

    Job { job: Job },

    Jobs { jobs: Vec<Job> },

    Detail { detail: JobDetail },

    Tasks { tasks: Vec<Task> },

    Reconciled { reconciled: Vec<Reconciliation> },

    Health { report: HealthReport },

    Stats { stats: StoreStats },

    /// Error response
    Error { kind: ErrorKind, message: String },
}

impl DaemonResponse {
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Error {
            kind,
            message: message.into(),
        }
    }
}

impl From<CoordinatorError> for DaemonResponse {
    fn from(err: CoordinatorError) -> Self {
        Self::error(ErrorKind::from(&err), err.to_string())
    }
}
