//! The job store: the single source of truth clients query.
//!
//! All mutations flow through [`JobStore::update`], a compare-and-set on the
//! record's `attempt`. A worker tags every write with the attempt number it
//! is executing; the store rejects writes from a superseded attempt, so a
//! late progress update from a cancelled-then-retried run can never overwrite
//! the newer attempt's state.

mod memory;
mod query;

pub use memory::MemoryJobStore;
pub use query::{ListPage, ListQuery, SortBy, SortOrder, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};

use crate::job::{JobDescriptor, JobId, JobRecord, JobStatus, RecordPatch};
use std::collections::HashMap;
use thiserror::Error;

/// Errors from job store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record with the given id.
    #[error("job {0} not found")]
    NotFound(JobId),

    /// A record with this id already exists.
    #[error("job {0} already exists")]
    DuplicateId(JobId),

    /// The write was tagged with an attempt that doesn't match the record:
    /// lower means a superseded attempt, more than one ahead is a caller bug.
    #[error("stale update for job {job_id}: tagged attempt {given}, record at attempt {current}")]
    Stale {
        job_id: JobId,
        given: u32,
        current: u32,
    },

    /// The patch requested a status change the state machine forbids.
    #[error("illegal status transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    /// Records may not be removed while a worker is executing them.
    #[error("job {0} is running and cannot be removed")]
    RemoveActive(JobId),

    /// Snapshot persistence failed.
    #[error("failed to persist job records: {0}")]
    Persist(String),
}

/// Durable, concurrently readable record store.
///
/// Implementations must be safe for concurrent access from all workers plus
/// the status/list read path.
pub trait JobStore: Send + Sync {
    /// Creates the initial pending record for a submitted descriptor.
    fn create(&self, descriptor: &JobDescriptor) -> Result<(), StoreError>;

    /// Applies a patch to a record, compare-and-set on `attempt`.
    ///
    /// A patch tagged with the record's current attempt updates in place;
    /// one tagged `current + 1` begins a fresh attempt (progress resets to 0,
    /// error fields clear). Anything else is rejected as [`StoreError::Stale`].
    /// Within an attempt, progress only moves forward.
    ///
    /// Returns the updated record.
    fn update(&self, job_id: &JobId, attempt: u32, patch: RecordPatch)
        -> Result<JobRecord, StoreError>;

    /// Fetches a record by id.
    fn get(&self, job_id: &JobId) -> Result<JobRecord, StoreError>;

    /// Lists records with filtering, sorting, and pagination.
    fn list(&self, query: &ListQuery) -> ListPage;

    /// Removes a record. Only `pending` or terminal records may be removed.
    fn remove(&self, job_id: &JobId) -> Result<(), StoreError>;

    /// Record counts per status, for operational stats.
    fn status_counts(&self) -> HashMap<JobStatus, usize>;
}
