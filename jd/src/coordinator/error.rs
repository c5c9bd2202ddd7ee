//! Coordinator errors

use thiserror::Error;

use crate::export::ExportError;
use crate::pool::PoolError;
use crate::state::StateError;
use crate::store::StoreError;

/// Errors from administrative operations
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Duplicate target: {0}")]
    DuplicateTarget(String),

    #[error("Job has no targets")]
    NoTargets,

    #[error("Invalid target at position {0}: empty")]
    BlankTarget(usize),

    #[error("Job {0} has no failed tasks to retry")]
    NothingToRetry(String),

    #[error(transparent)]
    PreflightFailed(#[from] PoolError),

    #[error("Export failed: {0}")]
    Export(#[from] ExportError),

    #[error("State error: {0}")]
    State(StateError),
}

impl From<StateError> for CoordinatorError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::NotFound(what) => Self::NotFound(what),
            StateError::Store(StoreError::DuplicateTarget { target, .. }) => Self::DuplicateTarget(target),
            other => Self::State(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_errors_map_to_taxonomy() {
        let err: CoordinatorError = StateError::NotFound("Job x".to_string()).into();
        assert!(matches!(err, CoordinatorError::NotFound(_)));

        let err: CoordinatorError = StateError::Store(StoreError::DuplicateTarget {
            job_id: "j".to_string(),
            target: "a".to_string(),
        })
        .into();
        assert!(matches!(err, CoordinatorError::DuplicateTarget(t) if t == "a"));

        let err: CoordinatorError = StateError::ChannelError.into();
        assert!(matches!(err, CoordinatorError::State(_)));
    }
}
