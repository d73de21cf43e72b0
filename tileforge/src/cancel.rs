//! Cancellation registry.
//!
//! Tracks cancellation requests by job id. A worker registers a fresh
//! [`CancellationToken`] when it begins an attempt; an external cancel call
//! fires that token. Requests that arrive before the attempt registers (the
//! dispatch race) are remembered and applied at registration time, so a
//! request is never silently dropped.

use crate::job::JobId;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Concurrent map of per-job cancellation state.
#[derive(Default)]
pub struct CancellationRegistry {
    /// Token for the currently executing attempt, if any.
    tokens: DashMap<JobId, CancellationToken>,

    /// Outstanding cancellation requests and when they were made.
    requests: DashMap<JobId, DateTime<Utc>>,
}

impl CancellationRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a token for a new attempt of `job_id`.
    ///
    /// If a cancellation request is already pending, the returned token is
    /// cancelled immediately; the pipeline observes it at its first
    /// checkpoint.
    pub fn register(&self, job_id: &JobId) -> CancellationToken {
        let token = CancellationToken::new();
        if self.requests.contains_key(job_id) {
            debug!(job_id = %job_id, "Cancellation was requested before dispatch, honoring now");
            token.cancel();
        }
        self.tokens.insert(job_id.clone(), token.clone());
        token
    }

    /// Records a cancellation request and fires the running attempt's token,
    /// if one is registered. Returns the request timestamp.
    pub fn request(&self, job_id: &JobId) -> DateTime<Utc> {
        let requested_at = Utc::now();
        self.requests.insert(job_id.clone(), requested_at);
        if let Some(token) = self.tokens.get(job_id) {
            token.cancel();
        }
        requested_at
    }

    /// Whether a cancellation request is outstanding for `job_id`.
    pub fn is_requested(&self, job_id: &JobId) -> bool {
        self.requests.contains_key(job_id)
    }

    /// Drops the attempt token but keeps any outstanding request, so a
    /// request made during a retry's backoff window still applies to the
    /// next attempt.
    pub fn unregister(&self, job_id: &JobId) {
        self.tokens.remove(job_id);
    }

    /// Clears all state for a job that reached a terminal status. The
    /// request, if any, has been observed at this point.
    pub fn clear(&self, job_id: &JobId) {
        self.tokens.remove(job_id);
        self.requests.remove(job_id);
    }
}
