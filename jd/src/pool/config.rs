//! Worker pool timing configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-attempt and cancellation timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PoolConfig {
    /// Upper bound on one `run` call; exceeding it fails the attempt
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,

    /// How long a session may take to report ready
    #[serde(default = "default_open_timeout_secs")]
    pub open_timeout_secs: u64,

    /// Grace before collaborator processes are force-terminated
    #[serde(default = "default_cancel_grace_secs")]
    pub cancel_grace_secs: u64,
}

fn default_task_timeout_secs() -> u64 {
    300
}

fn default_open_timeout_secs() -> u64 {
    30
}

fn default_cancel_grace_secs() -> u64 {
    5
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            task_timeout_secs: default_task_timeout_secs(),
            open_timeout_secs: default_open_timeout_secs(),
            cancel_grace_secs: default_cancel_grace_secs(),
        }
    }
}

impl PoolConfig {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_secs(self.open_timeout_secs)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_secs(self.cancel_grace_secs)
    }
}
