//! Retry policy
//!
//! Classifies session outcomes into final task statuses or retries with
//! backoff. Rate-limit errors back off hard, other transient errors mildly.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::TaskStatus;

/// Category of a retryable session error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Explicit throttling by the target
    RateLimited,
    /// The session did not answer in time
    Timeout,
    /// A reference into the session went stale
    StaleReference,
    /// Minor navigation failure
    Navigation,
    #[default]
    Other,
}

impl ErrorCategory {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited)
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::RateLimited => "rate_limited",
            Self::Timeout => "timeout",
            Self::StaleReference => "stale_reference",
            Self::Navigation => "navigation",
            Self::Other => "other",
        };
        write!(f, "{}", s)
    }
}

/// What an attempt's outcome means for the retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Success,
    /// Target does not exist; never retried
    NotFound,
    Retryable(ErrorCategory),
    Terminal,
}

/// Decision for one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The task is done with this status
    Finish(TaskStatus),
    /// Re-queue the task after `delay`
    Retry { delay: Duration },
}

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RetryConfig {
    /// Total attempts per task, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay for transient errors
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: u64,

    /// Base delay for rate-limit errors
    #[serde(default = "default_rate_limit_delay_secs")]
    pub rate_limit_delay_secs: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_secs() -> u64 {
    5
}

fn default_rate_limit_delay_secs() -> u64 {
    60
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_secs: default_base_delay_secs(),
            rate_limit_delay_secs: default_rate_limit_delay_secs(),
        }
    }
}

/// Backoff policy applied to every task attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    rate_limit_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, rate_limit_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            rate_limit_delay,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_secs(config.base_delay_secs),
            Duration::from_secs(config.rate_limit_delay_secs),
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Backoff before retrying after failed attempt `attempt` (0-based)
    pub fn delay(&self, attempt: u32, category: ErrorCategory) -> Duration {
        if category.is_rate_limit() {
            2u32.checked_pow(attempt)
                .and_then(|factor| self.rate_limit_delay.checked_mul(factor))
                .unwrap_or(Duration::MAX)
        } else {
            let factor = 1.5f64.powi(attempt.min(i32::MAX as u32) as i32);
            Duration::try_from_secs_f64(self.base_delay.as_secs_f64() * factor).unwrap_or(Duration::MAX)
        }
    }

    /// Decide what happens after attempt `attempt` (0-based) ended as `outcome`
    pub fn decide(&self, attempt: u32, outcome: Classification) -> Decision {
        debug!(attempt, ?outcome, "RetryPolicy::decide: called");
        match outcome {
            Classification::Success => Decision::Finish(TaskStatus::Success),
            Classification::NotFound => Decision::Finish(TaskStatus::NotFound),
            Classification::Terminal => Decision::Finish(TaskStatus::Failed),
            Classification::Retryable(category) => {
                if attempt.saturating_add(1) >= self.max_attempts {
                    debug!(attempt, %category, "RetryPolicy::decide: attempts exhausted");
                    Decision::Finish(TaskStatus::Failed)
                } else {
                    let delay = self.delay(attempt, category);
                    debug!(attempt, %category, ?delay, "RetryPolicy::decide: retrying");
                    Decision::Retry { delay }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_not_found_never_retries() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(0, Classification::NotFound),
            Decision::Finish(TaskStatus::NotFound)
        );
    }

    #[test]
    fn test_terminal_never_retries() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(0, Classification::Terminal),
            Decision::Finish(TaskStatus::Failed)
        );
    }

    #[test]
    fn test_rate_limit_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(0, Classification::Retryable(ErrorCategory::RateLimited)),
            Decision::Retry {
                delay: Duration::from_secs(60)
            }
        );
        assert_eq!(
            policy.decide(1, Classification::Retryable(ErrorCategory::RateLimited)),
            Decision::Retry {
                delay: Duration::from_secs(120)
            }
        );
    }

    #[test]
    fn test_generic_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(0, ErrorCategory::Timeout), Duration::from_secs(5));
        assert_eq!(policy.delay(1, ErrorCategory::Timeout), Duration::from_millis(7500));
        assert_eq!(policy.delay(2, ErrorCategory::StaleReference), Duration::from_millis(11250));
    }

    #[test]
    fn test_exhausted_attempts_fail() {
        let policy = RetryPolicy::default();
        assert!(matches!(
            policy.decide(1, Classification::Retryable(ErrorCategory::Other)),
            Decision::Retry { .. }
        ));
        assert_eq!(
            policy.decide(2, Classification::Retryable(ErrorCategory::RateLimited)),
            Decision::Finish(TaskStatus::Failed)
        );
    }

    #[test]
    fn test_huge_attempt_saturates() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(200, ErrorCategory::RateLimited), Duration::MAX);
        assert_eq!(policy.delay(5000, ErrorCategory::Other), Duration::MAX);
    }

    #[test]
    fn test_config_yaml_kebab_case() {
        let config: RetryConfig = serde_yaml::from_str("max-attempts: 5\nbase-delay-secs: 2").unwrap();
        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.max_attempts(), 5);
        assert_eq!(policy.delay(0, ErrorCategory::Other), Duration::from_secs(2));
        assert_eq!(policy.delay(0, ErrorCategory::RateLimited), Duration::from_secs(60));
    }

    proptest! {
        #[test]
        fn prop_backoff_formulas(n in 0u32..16, base in 1u64..30) {
            let policy = RetryPolicy::new(100, Duration::from_secs(base), Duration::from_secs(60));
            prop_assert_eq!(
                policy.delay(n, ErrorCategory::RateLimited),
                Duration::from_secs(60 * 2u64.pow(n))
            );
            let expected = base as f64 * 1.5f64.powi(n as i32);
            let actual = policy.delay(n, ErrorCategory::Navigation).as_secs_f64();
            prop_assert!((actual - expected).abs() < 1e-6 * expected.max(1.0));
        }

        #[test]
        fn prop_backoff_monotonic(n in 0u32..30) {
            let policy = RetryPolicy::default();
            for category in [ErrorCategory::RateLimited, ErrorCategory::Timeout] {
                prop_assert!(policy.delay(n + 1, category) > policy.delay(n, category));
            }
        }
    }
}
