//! Service-level errors and outcomes.

use crate::config::ConfigFileError;
use crate::job::{JobId, OptionsError};
use crate::store::StoreError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors reported synchronously to the submission caller.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The options failed validation (zoom bounds, layer selection).
    #[error("invalid options: {0}")]
    InvalidOptions(#[from] OptionsError),

    /// The source reference doesn't resolve to a file.
    #[error("source not found: {0}")]
    SourceNotFound(PathBuf),

    /// A job with this id already exists in a non-terminal state.
    #[error("job {0} already exists")]
    DuplicateJob(JobId),

    /// The record could not be stored.
    #[error("failed to record job: {0}")]
    Store(StoreError),
}

/// Errors from the status/list/management surface.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// No job with the given id.
    #[error("job {0} not found")]
    NotFound(JobId),

    /// Underlying store failure.
    #[error(transparent)]
    Store(StoreError),

    /// Bad configuration at startup.
    #[error(transparent)]
    Config(#[from] ConfigFileError),
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => Self::NotFound(id),
            other => Self::Store(other),
        }
    }
}

/// Outcome of a cancel call. Cancellation is idempotent: cancelling a
/// finished job reports `AlreadyTerminal` rather than erroring.
#[derive(Debug, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The request took effect: the job was removed from the queue or its
    /// running attempt was signalled.
    Accepted,

    /// The job had already reached a terminal status; nothing to do.
    AlreadyTerminal,

    /// No job with the given id.
    NotFound,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_not_found_maps_to_service_not_found() {
        let err: ServiceError = StoreError::NotFound(JobId::new("x")).into();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[test]
    fn test_submit_error_from_options() {
        let err: SubmitError = OptionsError::NoLayers.into();
        assert!(matches!(err, SubmitError::InvalidOptions(_)));
    }
}
