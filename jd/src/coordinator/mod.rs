//! Job coordination
//!
//! The JobCoordinator owns the job state machine. It validates submissions,
//! starts worker pools, records what they propose, finalizes jobs, and runs
//! periodic recovery over jobs whose owner went away.

mod core;
mod error;

pub use core::{ActiveJob, CoordinatorDeps, CoordinatorSettings, HealthReport, JobCoordinator, JobDetail, Owner};
pub use error::CoordinatorError;
