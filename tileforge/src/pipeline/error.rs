//! Error taxonomy for pipeline execution.
//!
//! Failure classes determine retry behavior: validation failures are
//! terminal on the spot, everything else earns another attempt until the
//! retry budget runs out. Cancellation is not an error and is modelled in
//! [`PipelineOutcome`] instead.

use crate::job::ResultRef;
use crate::stage::StageKind;
use thiserror::Error;

/// A failed pipeline attempt.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The source failed validation. Non-retryable: the input won't get
    /// better on a second try.
    #[error("validation failed: {0}")]
    Validation(String),

    /// An external stage tool failed (non-zero exit, spawn failure, timeout,
    /// or missing output artifact). Retryable.
    #[error("stage {stage} failed: {message}")]
    Stage {
        stage: StageKind,
        exit_code: Option<i32>,
        message: String,
    },

    /// The job's working directory could not be allocated. Retryable.
    #[error("resource error: {0}")]
    Resource(String),
}

impl PipelineError {
    /// Whether this failure should consume a retry attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Validation(_))
    }

    /// The stage the failure is attributed to.
    pub fn stage(&self) -> StageKind {
        match self {
            Self::Validation(_) => StageKind::Validate,
            Self::Stage { stage, .. } => *stage,
            Self::Resource(_) => StageKind::Validate,
        }
    }
}

/// Terminal result of one pipeline attempt.
#[derive(Debug)]
pub enum PipelineOutcome {
    /// All stages succeeded; the result artifact is published.
    Completed(ResultRef),

    /// A stage failed; the worker decides between retry and terminal failure.
    Failed(PipelineError),

    /// A cancellation request was observed; partial outputs are cleaned up.
    Cancelled,
}
