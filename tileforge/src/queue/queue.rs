//! The conversion queue: pending descriptors, bounded dispatch, delayed
//! retries.
//!
//! Workers suspend in [`ConversionQueue::dequeue`] until a descriptor is
//! ready or the queue closes. Initial submissions dispatch FIFO; retries
//! re-enter through a delay heap and become eligible no earlier than their
//! backoff deadline, competing with other ready jobs from then on.

use super::backoff::BackoffPolicy;
use crate::job::{JobDescriptor, JobId};
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// A descriptor handed to a worker, tagged with the attempt it should run.
#[derive(Debug)]
pub struct QueuedJob {
    /// The immutable job descriptor.
    pub descriptor: JobDescriptor,

    /// Attempt number this dispatch represents (1 for the initial run).
    pub attempt: u32,
}

/// Errors from queue admission.
#[derive(Debug, Error)]
pub enum EnqueueError {
    /// The job id is already queued, delayed, or dispatched.
    #[error("job {0} is already queued or running")]
    DuplicateId(JobId),
}

/// Result of asking the queue to cancel a job.
#[derive(Debug, PartialEq, Eq)]
pub enum QueueCancel {
    /// The job was still pending (or waiting out a retry delay) and has been
    /// removed; it will never run.
    Removed,

    /// The job is not held by the queue: either dispatched to a worker
    /// (cooperative cancellation applies instead) or unknown.
    NotPending,
}

/// Result of scheduling a retry.
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Another attempt was scheduled after the given delay.
    Scheduled { delay: Duration },

    /// The retry budget is spent; the job must be failed terminally.
    Exhausted,
}

/// Queue occupancy counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Jobs ready for immediate dispatch.
    pub pending: usize,

    /// Retries waiting out their backoff delay.
    pub delayed: usize,

    /// Jobs currently held by a worker.
    pub dispatched: usize,
}

/// Where a live job id currently sits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LiveState {
    Pending,
    Delayed,
    Dispatched,
}

/// A retry waiting for its backoff deadline.
struct DelayedJob {
    ready_at: Instant,
    sequence: u64,
    job: QueuedJob,
}

impl PartialEq for DelayedJob {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at && self.sequence == other.sequence
    }
}

impl Eq for DelayedJob {}

impl PartialOrd for DelayedJob {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedJob {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap pops the greatest element; invert so the earliest
        // deadline (then the oldest entry) comes out first.
        other
            .ready_at
            .cmp(&self.ready_at)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

struct QueueInner {
    ready: VecDeque<QueuedJob>,
    delayed: BinaryHeap<DelayedJob>,
    live: HashMap<JobId, LiveState>,
    sequence: u64,
}

/// FIFO job queue with delayed retry re-entry and duplicate rejection.
pub struct ConversionQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    closed: CancellationToken,
    backoff: BackoffPolicy,
    max_attempts: u32,
}

impl ConversionQueue {
    /// Creates a queue with the given retry policy.
    pub fn new(backoff: BackoffPolicy, max_attempts: u32) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                ready: VecDeque::new(),
                delayed: BinaryHeap::new(),
                live: HashMap::new(),
                sequence: 0,
            }),
            notify: Notify::new(),
            closed: CancellationToken::new(),
            backoff,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Maximum attempts per job, including the initial run.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Admits a new descriptor for its first attempt.
    pub async fn enqueue(&self, descriptor: JobDescriptor) -> Result<(), EnqueueError> {
        let job_id = descriptor.job_id.clone();
        {
            let mut inner = self.inner.lock().await;
            if inner.live.contains_key(&job_id) {
                return Err(EnqueueError::DuplicateId(job_id));
            }
            inner.live.insert(job_id.clone(), LiveState::Pending);
            inner.ready.push_back(QueuedJob {
                descriptor,
                attempt: 1,
            });
        }
        debug!(job_id = %job_id, "Job enqueued");
        self.notify.notify_one();
        Ok(())
    }

    /// Takes the next ready job, suspending until one is available.
    ///
    /// Returns `None` once the queue has been closed; in-flight retry delays
    /// are abandoned at that point.
    pub async fn dequeue(&self) -> Option<QueuedJob> {
        loop {
            if self.closed.is_cancelled() {
                return None;
            }

            let next_deadline = {
                let mut inner = self.inner.lock().await;
                Self::promote_due(&mut inner, Instant::now());

                if let Some(job) = inner.ready.pop_front() {
                    inner
                        .live
                        .insert(job.descriptor.job_id.clone(), LiveState::Dispatched);
                    return Some(job);
                }
                inner.delayed.peek().map(|d| d.ready_at)
            };

            match next_deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = self.closed.cancelled() => return None,
                        _ = self.notify.notified() => {}
                        _ = tokio::time::sleep_until(deadline) => {}
                    }
                }
                None => {
                    tokio::select! {
                        _ = self.closed.cancelled() => return None,
                        _ = self.notify.notified() => {}
                    }
                }
            }
        }
    }

    /// Moves delayed retries whose deadline has passed into the ready deque.
    fn promote_due(inner: &mut QueueInner, now: Instant) {
        while inner
            .delayed
            .peek()
            .is_some_and(|delayed| delayed.ready_at <= now)
        {
            if let Some(delayed) = inner.delayed.pop() {
                let job_id = delayed.job.descriptor.job_id.clone();
                inner.live.insert(job_id, LiveState::Pending);
                inner.ready.push_back(delayed.job);
            }
        }
    }

    /// Removes a job the queue still holds (pending or delayed).
    ///
    /// Dispatched or unknown jobs return [`QueueCancel::NotPending`]; for a
    /// dispatched job the caller must go through the cancellation registry.
    pub async fn cancel(&self, job_id: &JobId) -> QueueCancel {
        let mut inner = self.inner.lock().await;
        match inner.live.get(job_id).copied() {
            Some(LiveState::Pending) => {
                inner.ready.retain(|job| job.descriptor.job_id != *job_id);
                inner.live.remove(job_id);
                info!(job_id = %job_id, "Removed pending job from queue");
                QueueCancel::Removed
            }
            Some(LiveState::Delayed) => {
                inner
                    .delayed
                    .retain(|delayed| delayed.job.descriptor.job_id != *job_id);
                inner.live.remove(job_id);
                info!(job_id = %job_id, "Removed delayed retry from queue");
                QueueCancel::Removed
            }
            Some(LiveState::Dispatched) | None => QueueCancel::NotPending,
        }
    }

    /// Schedules another attempt for a job that failed retryably.
    ///
    /// Called by the worker that holds the job. The job stays in the live set
    /// (duplicate submissions remain rejected) while it waits out its delay.
    pub async fn requeue_for_retry(
        &self,
        descriptor: JobDescriptor,
        next_attempt: u32,
    ) -> RetryDecision {
        if next_attempt > self.max_attempts {
            return RetryDecision::Exhausted;
        }

        let delay = self.backoff.delay_before_attempt(next_attempt);
        let job_id = descriptor.job_id.clone();
        {
            let mut inner = self.inner.lock().await;
            inner.live.insert(job_id.clone(), LiveState::Delayed);
            let sequence = inner.sequence;
            inner.sequence += 1;
            inner.delayed.push(DelayedJob {
                ready_at: Instant::now() + delay,
                sequence,
                job: QueuedJob {
                    descriptor,
                    attempt: next_attempt,
                },
            });
        }

        debug!(
            job_id = %job_id,
            attempt = next_attempt,
            delay_ms = delay.as_millis() as u64,
            "Retry scheduled"
        );
        // Wake a sleeping worker so it recomputes its deadline.
        self.notify.notify_one();
        RetryDecision::Scheduled { delay }
    }

    /// Drops a terminal job from the live set, permitting id reuse.
    pub async fn release(&self, job_id: &JobId) {
        let mut inner = self.inner.lock().await;
        inner.live.remove(job_id);
    }

    /// Stops dispatch: current and future `dequeue` calls return `None`.
    pub fn close(&self) {
        self.closed.cancel();
        self.notify.notify_waiters();
    }

    /// Whether the queue has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Current occupancy counts.
    pub async fn stats(&self) -> QueueStats {
        let inner = self.inner.lock().await;
        QueueStats {
            pending: inner.ready.len(),
            delayed: inner.delayed.len(),
            dispatched: inner
                .live
                .values()
                .filter(|state| **state == LiveState::Dispatched)
                .count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::ConvertOptions;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn descriptor(id: &str) -> JobDescriptor {
        JobDescriptor::new(
            JobId::new(id),
            PathBuf::from("/data/region.pbf"),
            ConvertOptions::default(),
        )
    }

    fn queue() -> ConversionQueue {
        ConversionQueue::new(
            BackoffPolicy {
                base: Duration::from_millis(100),
                max_delay: Duration::from_secs(5),
                jitter: false,
            },
            3,
        )
    }

    #[tokio::test]
    async fn test_fifo_dispatch_order() {
        let queue = queue();
        queue.enqueue(descriptor("first")).await.unwrap();
        queue.enqueue(descriptor("second")).await.unwrap();

        assert_eq!(
            queue.dequeue().await.unwrap().descriptor.job_id.as_str(),
            "first"
        );
        assert_eq!(
            queue.dequeue().await.unwrap().descriptor.job_id.as_str(),
            "second"
        );
    }

    #[tokio::test]
    async fn test_duplicate_rejected_until_released() {
        let queue = queue();
        queue.enqueue(descriptor("dup")).await.unwrap();
        assert!(matches!(
            queue.enqueue(descriptor("dup")).await,
            Err(EnqueueError::DuplicateId(_))
        ));

        // Still live while dispatched.
        let job = queue.dequeue().await.unwrap();
        assert!(queue.enqueue(descriptor("dup")).await.is_err());

        queue.release(&job.descriptor.job_id).await;
        assert!(queue.enqueue(descriptor("dup")).await.is_ok());
    }

    #[tokio::test]
    async fn test_dequeue_blocks_until_enqueue() {
        let queue = Arc::new(queue());
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.dequeue().await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        queue.enqueue(descriptor("late")).await.unwrap();
        let job = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(job.descriptor.job_id.as_str(), "late");
    }

    #[tokio::test]
    async fn test_close_unblocks_dequeue() {
        let queue = Arc::new(queue());
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.dequeue().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_cancel_pending_removes_job() {
        let queue = queue();
        queue.enqueue(descriptor("doomed")).await.unwrap();

        assert_eq!(queue.cancel(&JobId::new("doomed")).await, QueueCancel::Removed);
        assert_eq!(queue.stats().await.pending, 0);
        // Id is free again.
        assert!(queue.enqueue(descriptor("doomed")).await.is_ok());
    }

    #[tokio::test]
    async fn test_cancel_dispatched_is_not_pending() {
        let queue = queue();
        queue.enqueue(descriptor("running")).await.unwrap();
        let _job = queue.dequeue().await.unwrap();

        assert_eq!(
            queue.cancel(&JobId::new("running")).await,
            QueueCancel::NotPending
        );
    }

    #[tokio::test]
    async fn test_cancel_unknown_is_not_pending() {
        let queue = queue();
        assert_eq!(
            queue.cancel(&JobId::new("ghost")).await,
            QueueCancel::NotPending
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_waits_out_backoff_delay() {
        let queue = queue();
        queue.enqueue(descriptor("retry")).await.unwrap();
        let job = queue.dequeue().await.unwrap();

        let decision = queue.requeue_for_retry(job.descriptor, 2).await;
        assert_eq!(
            decision,
            RetryDecision::Scheduled {
                delay: Duration::from_millis(100)
            }
        );

        let before = Instant::now();
        let retried = queue.dequeue().await.unwrap();
        assert_eq!(retried.attempt, 2);
        assert!(Instant::now() - before >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_retry_exhausted_past_max_attempts() {
        let queue = queue();
        queue.enqueue(descriptor("spent")).await.unwrap();
        let job = queue.dequeue().await.unwrap();

        assert_eq!(
            queue.requeue_for_retry(job.descriptor, 4).await,
            RetryDecision::Exhausted
        );
    }

    #[tokio::test]
    async fn test_delayed_retry_can_be_cancelled() {
        let queue = queue();
        queue.enqueue(descriptor("delayed")).await.unwrap();
        let job = queue.dequeue().await.unwrap();
        queue.requeue_for_retry(job.descriptor, 2).await;

        assert_eq!(queue.stats().await.delayed, 1);
        assert_eq!(
            queue.cancel(&JobId::new("delayed")).await,
            QueueCancel::Removed
        );
        assert_eq!(queue.stats().await.delayed, 0);
    }

    #[tokio::test]
    async fn test_stats_track_states() {
        let queue = queue();
        queue.enqueue(descriptor("a")).await.unwrap();
        queue.enqueue(descriptor("b")).await.unwrap();
        let _a = queue.dequeue().await.unwrap();

        let stats = queue.stats().await;
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.dispatched, 1);
        assert_eq!(stats.delayed, 0);
    }
}
