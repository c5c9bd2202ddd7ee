//! SQLite persistence for jobs, tasks, and result records
//!
//! The store is synchronous and owned by a single `StateManager` actor, so
//! callers never share a connection across tasks.

mod sqlite;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use sqlite::Store;

/// Name of the database file inside the data directory
pub const DB_FILE_NAME: &str = "jobdaemon.db";

/// Errors from store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate target '{target}' in job {job_id}")]
    DuplicateTarget { job_id: String, target: String },

    #[error("Record already exists: {0}")]
    AlreadyExists(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Task counts per status for a single job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    pub pending: u32,
    pub processing: u32,
    pub success: u32,
    pub failed: u32,
    pub not_found: u32,
    pub cancelled: u32,
}

impl TaskCounts {
    /// All tasks in the job
    pub fn total(&self) -> u32 {
        self.pending + self.processing + self.success + self.failed + self.not_found + self.cancelled
    }

    /// Tasks in a terminal status
    pub fn terminal(&self) -> u32 {
        self.success + self.failed + self.not_found + self.cancelled
    }

    /// Whether the job has tasks and all of them are terminal
    pub fn all_terminal(&self) -> bool {
        self.total() > 0 && self.terminal() == self.total()
    }
}

/// Aggregate statistics across all jobs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_jobs: u64,
    pub pending_jobs: u64,
    pub running_jobs: u64,
    pub completed_jobs: u64,
    pub failed_jobs: u64,
    pub cancelled_jobs: u64,
    pub total_tasks: u64,
    pub successful_tasks: u64,
}
