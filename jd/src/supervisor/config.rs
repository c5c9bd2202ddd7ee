//! Supervisor configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SupervisorConfig {
    /// Seconds between orphan reaping and lock verification passes
    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,

    /// Endpoint recorded in the process lock; defaults to the IPC socket path
    #[serde(default)]
    pub endpoint: Option<String>,
}

fn default_monitor_interval_secs() -> u64 {
    30
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            monitor_interval_secs: default_monitor_interval_secs(),
            endpoint: None,
        }
    }
}

impl SupervisorConfig {
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }
}
