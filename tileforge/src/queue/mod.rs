//! Durable job queue: FIFO admission, bounded dispatch to workers, delayed
//! retry re-entry with exponential backoff.

mod backoff;
#[allow(clippy::module_inception)]
mod queue;

pub use backoff::BackoffPolicy;
pub use queue::{
    ConversionQueue, EnqueueError, QueueCancel, QueueStats, QueuedJob, RetryDecision,
};
