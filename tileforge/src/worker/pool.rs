//! The worker pool: N concurrent executors over the queue.
//!
//! Each worker loops dequeue → begin attempt → run pipeline → persist the
//! terminal state (or schedule a retry) → release. The pipeline runs in its
//! own task so a panic inside one job is converted into a terminal `failed`
//! record instead of taking down the worker or its siblings.

use crate::cancel::CancellationRegistry;
use crate::job::{JobDescriptor, JobId, JobStatus, RecordPatch};
use crate::pipeline::{ConversionPipeline, PipelineOutcome};
use crate::queue::{ConversionQueue, QueuedJob, RetryDecision};
use crate::store::{JobStore, StoreError};
use crate::telemetry::{TelemetryEvent, TelemetrySink};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Shared collaborators handed to every worker.
pub struct WorkerContext {
    /// Source of work and retry scheduling.
    pub queue: Arc<ConversionQueue>,

    /// Authoritative job records.
    pub store: Arc<dyn JobStore>,

    /// Per-job cancellation state.
    pub registry: Arc<CancellationRegistry>,

    /// The stage executor.
    pub pipeline: Arc<ConversionPipeline>,

    /// Lifecycle event sink.
    pub telemetry: Arc<dyn TelemetrySink>,
}

/// Fixed-size pool of conversion workers.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `worker_count` workers (at least one).
    pub fn spawn(worker_count: usize, ctx: Arc<WorkerContext>) -> Self {
        let worker_count = worker_count.max(1);
        let handles = (0..worker_count)
            .map(|index| {
                let ctx = Arc::clone(&ctx);
                tokio::spawn(worker_loop(index, ctx))
            })
            .collect();
        info!(worker_count, "Worker pool started");
        Self { handles }
    }

    /// Number of workers.
    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    /// Waits for all workers to exit.
    ///
    /// Workers exit once the queue is closed and their current job (if any)
    /// has reached a terminal state; close the queue first.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task ended abnormally");
            }
        }
        info!("Worker pool stopped");
    }
}

async fn worker_loop(index: usize, ctx: Arc<WorkerContext>) {
    debug!(worker = index, "Worker started");
    while let Some(job) = ctx.queue.dequeue().await {
        process_job(index, &ctx, job).await;
    }
    debug!(worker = index, "Worker stopped");
}

/// Runs one dequeued job to a terminal state or a scheduled retry.
async fn process_job(worker: usize, ctx: &WorkerContext, job: QueuedJob) {
    let QueuedJob {
        descriptor,
        attempt,
    } = job;
    let job_id = descriptor.job_id.clone();

    let token = ctx.registry.register(&job_id);

    if let Err(e) = ctx.store.update(
        &job_id,
        attempt,
        RecordPatch::new().status(JobStatus::Running).started_now(),
    ) {
        // The record was removed or superseded while the job sat in the
        // queue; nothing to execute.
        warn!(job_id = %job_id, attempt, error = %e, "Could not begin attempt, dropping job");
        ctx.registry.clear(&job_id);
        ctx.queue.release(&job_id).await;
        return;
    }

    info!(job_id = %job_id, attempt, worker, "Job started");
    ctx.telemetry.emit(TelemetryEvent::AttemptStarted {
        job_id: job_id.clone(),
        attempt,
    });

    // Panic isolation: the pipeline runs in its own task.
    let run = {
        let pipeline = Arc::clone(&ctx.pipeline);
        let descriptor = descriptor.clone();
        let token = token.clone();
        tokio::spawn(async move { pipeline.run(&descriptor, attempt, token).await })
    };

    let outcome = match run.await {
        Ok(outcome) => outcome,
        Err(join_error) => {
            error!(job_id = %job_id, attempt, error = %join_error, "Pipeline task panicked");
            finish(
                ctx,
                &job_id,
                attempt,
                JobStatus::Failed,
                RecordPatch::new()
                    .status(JobStatus::Failed)
                    .error_message(format!("internal error: {}", join_error))
                    .finished_now(),
            )
            .await;
            return;
        }
    };

    match outcome {
        PipelineOutcome::Completed(result) => {
            info!(
                job_id = %job_id,
                attempt,
                path = %result.path.display(),
                size_bytes = result.size_bytes,
                "Job completed"
            );
            finish(
                ctx,
                &job_id,
                attempt,
                JobStatus::Completed,
                RecordPatch::new()
                    .status(JobStatus::Completed)
                    .progress(100)
                    .result(result)
                    .finished_now(),
            )
            .await;
        }
        PipelineOutcome::Cancelled => {
            info!(job_id = %job_id, attempt, "Job cancelled");
            finish(
                ctx,
                &job_id,
                attempt,
                JobStatus::Cancelled,
                RecordPatch::new()
                    .status(JobStatus::Cancelled)
                    .finished_now(),
            )
            .await;
        }
        PipelineOutcome::Failed(pipeline_error) => {
            let max_attempts = ctx.queue.max_attempts();
            let failed_stage = pipeline_error.stage();
            let message = pipeline_error.to_string();

            if pipeline_error.is_retryable() && attempt < max_attempts {
                schedule_retry(ctx, descriptor, attempt, failed_stage, message).await;
            } else {
                error!(
                    job_id = %job_id,
                    attempt,
                    stage = %failed_stage,
                    error = %message,
                    "Job failed terminally"
                );
                finish(
                    ctx,
                    &job_id,
                    attempt,
                    JobStatus::Failed,
                    RecordPatch::new()
                        .status(JobStatus::Failed)
                        .error_message(message)
                        .failed_stage(failed_stage)
                        .finished_now(),
                )
                .await;
            }
        }
    }
}

/// Records a retryable failure and parks the job back in the queue.
async fn schedule_retry(
    ctx: &WorkerContext,
    descriptor: JobDescriptor,
    attempt: u32,
    failed_stage: crate::stage::StageKind,
    message: String,
) {
    let job_id = descriptor.job_id.clone();

    // running -> failed (error recorded) -> pending (retry scheduled).
    apply_patch(
        ctx,
        &job_id,
        attempt,
        RecordPatch::new()
            .status(JobStatus::Failed)
            .error_message(message.clone())
            .failed_stage(failed_stage),
    );
    apply_patch(
        ctx,
        &job_id,
        attempt,
        RecordPatch::new().status(JobStatus::Pending),
    );

    match ctx.queue.requeue_for_retry(descriptor, attempt + 1).await {
        RetryDecision::Scheduled { delay } => {
            warn!(
                job_id = %job_id,
                attempt,
                next_attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %message,
                "Retrying after stage failure"
            );
            ctx.telemetry.emit(TelemetryEvent::RetryScheduled {
                job_id: job_id.clone(),
                next_attempt: attempt + 1,
                delay,
            });
            // The job stays live in the queue; keep any pending cancellation
            // request so the next attempt observes it.
            ctx.registry.unregister(&job_id);
        }
        RetryDecision::Exhausted => {
            // Guarded by the attempt check above; kept for safety.
            finish(
                ctx,
                &job_id,
                attempt,
                JobStatus::Failed,
                RecordPatch::new()
                    .status(JobStatus::Failed)
                    .error_message(message)
                    .failed_stage(failed_stage)
                    .finished_now(),
            )
            .await;
        }
    }
}

/// Persists a terminal state and releases the job everywhere.
async fn finish(
    ctx: &WorkerContext,
    job_id: &JobId,
    attempt: u32,
    status: JobStatus,
    patch: RecordPatch,
) {
    apply_patch(ctx, job_id, attempt, patch);
    ctx.telemetry.emit(TelemetryEvent::JobFinished {
        job_id: job_id.clone(),
        status,
        attempt,
    });
    ctx.registry.clear(job_id);
    ctx.queue.release(job_id).await;
}

/// Applies a patch, logging anything other than supersession.
fn apply_patch(ctx: &WorkerContext, job_id: &JobId, attempt: u32, patch: RecordPatch) {
    match ctx.store.update(job_id, attempt, patch) {
        Ok(_) | Err(StoreError::Stale { .. }) => {}
        Err(e) => {
            warn!(job_id = %job_id, attempt, error = %e, "Failed to persist job state");
        }
    }
}
