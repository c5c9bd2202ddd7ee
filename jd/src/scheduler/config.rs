//! Throughput limits configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Global throughput and concurrency limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SchedulerConfig {
    /// Max admissions per rate window, shared by every worker
    #[serde(default = "default_max_requests_per_window")]
    pub max_requests_per_window: u32,

    /// Rate limit window duration in seconds
    #[serde(default = "default_rate_window_secs")]
    pub rate_window_secs: u64,

    /// Worker slots used when a job does not ask for a count
    #[serde(default = "default_workers")]
    pub default_workers: usize,

    /// Upper bound on worker slots per job
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

fn default_max_requests_per_window() -> u32 {
    15
}

fn default_rate_window_secs() -> u64 {
    60
}

fn default_workers() -> usize {
    4
}

fn default_max_workers() -> usize {
    10
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_requests_per_window: default_max_requests_per_window(),
            rate_window_secs: default_rate_window_secs(),
            default_workers: default_workers(),
            max_workers: default_max_workers(),
        }
    }
}

impl SchedulerConfig {
    /// Get the rate window as a Duration
    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_window_secs)
    }

    /// Resolve a requested worker count against the defaults and bound
    pub fn resolve_workers(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(self.default_workers).clamp(1, self.max_workers.max(1))
    }
}
