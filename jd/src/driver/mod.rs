//! Session driver abstraction
//!
//! A session drives one external, possibly flaky, interactive process
//! against a target. The pool opens a fresh session per attempt and always
//! closes it, whatever the attempt's outcome.

mod command;
#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::ResultPoint;
use crate::retry::{Classification, ErrorCategory};

pub use command::{CommandDriver, CommandDriverFactory, DriverConfig};

/// Errors from driving a session
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("No session program configured")]
    NotConfigured,

    #[error("Failed to spawn session: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Session IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Session not ready: {0}")]
    NotReady(String),

    #[error("Session timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Session protocol error: {0}")]
    Protocol(String),

    #[error("Session is not open")]
    NotOpen,
}

/// Result of running one target through a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionOutcome {
    Success {
        /// Short description of what was found (e.g. entity name)
        summary: String,
        #[serde(default)]
        records: Vec<ResultPoint>,
    },
    NotFound {
        #[serde(default)]
        detail: Option<String>,
    },
    RetryableError {
        #[serde(default)]
        category: ErrorCategory,
        #[serde(default)]
        detail: String,
    },
    TerminalError {
        #[serde(default)]
        detail: String,
    },
}

impl SessionOutcome {
    pub fn classify(&self) -> Classification {
        match self {
            Self::Success { .. } => Classification::Success,
            Self::NotFound { .. } => Classification::NotFound,
            Self::RetryableError { category, .. } => Classification::Retryable(*category),
            Self::TerminalError { .. } => Classification::Terminal,
        }
    }

    /// Human-readable failure detail
    pub fn detail(&self) -> String {
        match self {
            Self::Success { .. } => String::new(),
            Self::NotFound { detail } => detail.clone().unwrap_or_else(|| "target not found".to_string()),
            Self::RetryableError { category, detail } => format!("{}: {}", category, detail),
            Self::TerminalError { detail } => detail.clone(),
        }
    }
}

/// One automation session
#[async_trait]
pub trait SessionDriver: Send {
    /// Bring the session up; failure means the environment is broken
    async fn open(&mut self) -> Result<(), DriverError>;

    /// Process one target
    async fn run(&mut self, target: &str) -> Result<SessionOutcome, DriverError>;

    /// Release the session; must be safe to call more than once
    async fn close(&mut self);
}

/// Creates a fresh session for each attempt
pub trait SessionFactory: Send + Sync {
    fn create(&self, job_id: &str) -> Box<dyn SessionDriver>;
}
