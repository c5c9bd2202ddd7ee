//! Admission control for session attempts
//!
//! One sliding-window limiter shared by every worker of every job.

mod config;
mod limiter;

pub use config::SchedulerConfig;
pub use limiter::RateLimiter;
