//! Worker pool for one job
//!
//! A fixed number of worker slots pull tasks in submission order, wait on
//! the shared rate limiter, run each attempt in a fresh session and report
//! every transition back over a channel.

mod cancel;
mod config;
mod core;

pub use cancel::CancelToken;
pub use config::PoolConfig;
pub use core::{PoolContext, PoolError, PoolReport, Proposal, WorkerPool};
