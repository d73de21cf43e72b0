//! Mutable, durable job records.
//!
//! Exactly one [`JobRecord`] exists per job for its whole lifetime, including
//! across retries. Records are owned by the store and mutated only through
//! [`RecordPatch`]es applied by the worker currently holding the job; the
//! store's compare-and-set on `attempt` rejects writes from a superseded
//! attempt.

use super::descriptor::JobDescriptor;
use super::id::JobId;
use super::options::ConvertOptions;
use super::status::JobStatus;
use crate::stage::StageKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Location and size of a completed job's output artifact.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRef {
    /// Path of the packaged tile archive in the results directory.
    pub path: PathBuf,

    /// Size of the archive in bytes.
    pub size_bytes: u64,
}

/// The authoritative, queryable state of one conversion job.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobRecord {
    /// Unique job identifier.
    pub job_id: JobId,

    /// Source extract the job was submitted with.
    pub source: PathBuf,

    /// Options the job was submitted with.
    pub options: ConvertOptions,

    /// Current lifecycle status.
    pub status: JobStatus,

    /// Stage currently (or last) executing, if any attempt has started.
    pub current_stage: Option<StageKind>,

    /// Overall progress, 0-100. Monotonically non-decreasing within an
    /// attempt; resets to 0 when a new attempt begins.
    pub progress: u8,

    /// Number of the attempt most recently begun, starting at 1.
    pub attempt: u32,

    /// When the job was submitted.
    pub created_at: DateTime<Utc>,

    /// When the current attempt started executing.
    pub started_at: Option<DateTime<Utc>>,

    /// When the job reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,

    /// Error text from the most recent failure, if any.
    pub error_message: Option<String>,

    /// Stage the most recent failure occurred in, if any.
    pub failed_stage: Option<StageKind>,

    /// Output artifact, set once the job completes.
    pub result: Option<ResultRef>,
}

impl JobRecord {
    /// Creates the initial pending record for a freshly submitted job.
    pub fn new(descriptor: &JobDescriptor) -> Self {
        Self {
            job_id: descriptor.job_id.clone(),
            source: descriptor.source.clone(),
            options: descriptor.options.clone(),
            status: JobStatus::Pending,
            current_stage: None,
            progress: 0,
            attempt: 1,
            created_at: descriptor.created_at,
            started_at: None,
            finished_at: None,
            error_message: None,
            failed_stage: None,
            result: None,
        }
    }
}

/// A partial update to a [`JobRecord`].
///
/// Unset fields leave the record untouched. Built with the fluent methods:
///
/// ```ignore
/// let patch = RecordPatch::new()
///     .status(JobStatus::Running)
///     .current_stage(StageKind::Validate)
///     .started_now();
/// ```
#[derive(Clone, Debug, Default)]
pub struct RecordPatch {
    pub(crate) status: Option<JobStatus>,
    pub(crate) current_stage: Option<StageKind>,
    pub(crate) progress: Option<u8>,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) finished_at: Option<DateTime<Utc>>,
    pub(crate) error_message: Option<String>,
    pub(crate) failed_stage: Option<StageKind>,
    pub(crate) result: Option<ResultRef>,
}

impl RecordPatch {
    /// Creates an empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the job status.
    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Sets the currently executing stage.
    pub fn current_stage(mut self, stage: StageKind) -> Self {
        self.current_stage = Some(stage);
        self
    }

    /// Sets the overall progress (clamped monotonic by the store).
    pub fn progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress.min(100));
        self
    }

    /// Marks the attempt as started now.
    pub fn started_now(mut self) -> Self {
        self.started_at = Some(Utc::now());
        self
    }

    /// Marks the job as finished now.
    pub fn finished_now(mut self) -> Self {
        self.finished_at = Some(Utc::now());
        self
    }

    /// Records an error message.
    pub fn error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    /// Records the stage a failure occurred in.
    pub fn failed_stage(mut self, stage: StageKind) -> Self {
        self.failed_stage = Some(stage);
        self
    }

    /// Records the output artifact.
    pub fn result(mut self, result: ResultRef) -> Self {
        self.result = Some(result);
        self
    }
}
