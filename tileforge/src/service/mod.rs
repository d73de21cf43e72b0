//! The conversion service facade.
//!
//! One [`ConversionService`] is constructed at process start and passed to
//! everything needing queue or store access — there are no hidden process-
//! wide singletons. It wires the queue, store, cancellation registry,
//! pipeline, and worker pool together and exposes the submit / status /
//! cancel / list surface an API layer builds on.
//!
//! # Example
//!
//! ```ignore
//! use tileforge::config::ConfigFile;
//! use tileforge::job::ConvertOptions;
//! use tileforge::service::ConversionService;
//!
//! let config = ConfigFile::load()?;
//! let service = ConversionService::start(&config)?;
//!
//! let job_id = service.submit("/data/region.osm.pbf", ConvertOptions::default()).await?;
//! let report = service.status(&job_id)?;
//! println!("{}: {}%", report.status, report.progress);
//! ```

mod error;

pub use error::{CancelOutcome, ServiceError, SubmitError};

use crate::cancel::CancellationRegistry;
use crate::config::ConfigFile;
use crate::job::{
    ConvertOptions, JobDescriptor, JobId, JobRecord, JobStatus, RecordPatch, ResultRef,
};
use crate::pipeline::ConversionPipeline;
use crate::queue::{ConversionQueue, EnqueueError, QueueCancel, QueueStats};
use crate::stage::{ProcessStageRunner, StageKind, StageRunner};
use crate::store::{JobStore, ListPage, ListQuery, MemoryJobStore, StoreError};
use crate::telemetry::{TelemetryEvent, TelemetrySink, TracingTelemetrySink};
use crate::worker::{WorkerContext, WorkerPool};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Client-facing view of a job's state.
#[derive(Clone, Debug)]
pub struct StatusReport {
    /// Job identifier.
    pub job_id: JobId,

    /// Lifecycle status.
    pub status: JobStatus,

    /// Overall progress, 0-100.
    pub progress: u8,

    /// Stage currently (or last) executing.
    pub current_stage: Option<StageKind>,

    /// Attempt number most recently begun.
    pub attempt: u32,

    /// Failure text, present only for failed jobs.
    pub error_message: Option<String>,

    /// Stage the failure occurred in, present only for failed jobs.
    pub failed_stage: Option<StageKind>,

    /// Output artifact, present once completed.
    pub result: Option<ResultRef>,
}

impl From<JobRecord> for StatusReport {
    fn from(record: JobRecord) -> Self {
        Self {
            job_id: record.job_id,
            status: record.status,
            progress: record.progress,
            current_stage: record.current_stage,
            attempt: record.attempt,
            error_message: record.error_message,
            failed_stage: record.failed_stage,
            result: record.result,
        }
    }
}

/// Operational counters across the queue and record store.
#[derive(Clone, Copy, Debug, Default)]
pub struct ServiceStats {
    /// Queue occupancy.
    pub queue: QueueStats,
    /// Records in `pending`.
    pub pending: usize,
    /// Records in `running`.
    pub running: usize,
    /// Records in `completed`.
    pub completed: usize,
    /// Records in `failed`.
    pub failed: usize,
    /// Records in `cancelled`.
    pub cancelled: usize,
    /// All records.
    pub total: usize,
}

/// The assembled conversion system.
pub struct ConversionService {
    queue: Arc<ConversionQueue>,
    store: Arc<dyn JobStore>,
    registry: Arc<CancellationRegistry>,
    telemetry: Arc<dyn TelemetrySink>,
    pool: Option<WorkerPool>,
}

impl ConversionService {
    /// Starts the service with production collaborators: the subprocess
    /// stage runner and a store snapshotted per the configuration.
    ///
    /// Must be called within a tokio runtime; workers are spawned
    /// immediately.
    pub fn start(config: &ConfigFile) -> Result<Self, ServiceError> {
        let store: Arc<dyn JobStore> = match &config.paths.snapshot {
            Some(path) => Arc::new(MemoryJobStore::with_snapshot(path).map_err(ServiceError::from)?),
            None => Arc::new(MemoryJobStore::new()),
        };
        Self::start_with(
            config,
            store,
            Arc::new(ProcessStageRunner),
            Arc::new(TracingTelemetrySink),
        )
    }

    /// Starts the service with injected collaborators (the test seam).
    pub fn start_with(
        config: &ConfigFile,
        store: Arc<dyn JobStore>,
        runner: Arc<dyn StageRunner>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Result<Self, ServiceError> {
        let queue = Arc::new(ConversionQueue::new(
            config.queue.backoff_policy(),
            config.queue.max_attempts,
        ));
        let registry = Arc::new(CancellationRegistry::new());
        let pipeline = Arc::new(ConversionPipeline::new(
            Arc::clone(&store),
            runner,
            Arc::clone(&telemetry),
            config.paths.temp_dir.clone(),
            config.paths.results_dir.clone(),
            config.tools.tool_paths(),
            config.workers.stage_timeout(),
        ));

        let ctx = Arc::new(WorkerContext {
            queue: Arc::clone(&queue),
            store: Arc::clone(&store),
            registry: Arc::clone(&registry),
            pipeline,
            telemetry: Arc::clone(&telemetry),
        });
        let pool = WorkerPool::spawn(config.workers.count, ctx);

        info!(
            workers = config.workers.count,
            max_attempts = config.queue.max_attempts,
            temp_dir = %config.paths.temp_dir.display(),
            results_dir = %config.paths.results_dir.display(),
            "Conversion service started"
        );

        Ok(Self {
            queue,
            store,
            registry,
            telemetry,
            pool: Some(pool),
        })
    }

    /// Submits a conversion with a system-generated job id.
    pub async fn submit(
        &self,
        source: impl Into<PathBuf>,
        options: ConvertOptions,
    ) -> Result<JobId, SubmitError> {
        self.submit_with_id(JobId::generate(), source, options).await
    }

    /// Submits a conversion under a caller-supplied job id.
    ///
    /// Option and source errors are synchronous; everything after admission
    /// surfaces only through the status interface.
    pub async fn submit_with_id(
        &self,
        job_id: JobId,
        source: impl Into<PathBuf>,
        options: ConvertOptions,
    ) -> Result<JobId, SubmitError> {
        let source = source.into();
        options.validate()?;

        match tokio::fs::metadata(&source).await {
            Ok(metadata) if metadata.is_file() => {}
            _ => return Err(SubmitError::SourceNotFound(source)),
        }

        let descriptor = JobDescriptor::new(job_id.clone(), source, options);
        self.store.create(&descriptor).map_err(|e| match e {
            StoreError::DuplicateId(id) => SubmitError::DuplicateJob(id),
            other => SubmitError::Store(other),
        })?;

        if let Err(EnqueueError::DuplicateId(id)) = self.queue.enqueue(descriptor).await {
            // The store admitted the id but the queue still holds it; undo
            // the record so submit stays atomic from the caller's view.
            let _ = self.store.remove(&id);
            return Err(SubmitError::DuplicateJob(id));
        }

        info!(job_id = %job_id, "Job submitted");
        self.telemetry.emit(TelemetryEvent::JobSubmitted {
            job_id: job_id.clone(),
        });
        Ok(job_id)
    }

    /// The client-facing status view for a job.
    pub fn status(&self, job_id: &JobId) -> Result<StatusReport, ServiceError> {
        Ok(StatusReport::from(self.store.get(job_id)?))
    }

    /// The full job record.
    pub fn record(&self, job_id: &JobId) -> Result<JobRecord, ServiceError> {
        Ok(self.store.get(job_id)?)
    }

    /// Lists job records with filtering, sorting, and pagination.
    pub fn list(&self, query: &ListQuery) -> ListPage {
        self.store.list(query)
    }

    /// Requests cancellation of a job. Idempotent.
    ///
    /// A still-pending job is removed from the queue and becomes `cancelled`
    /// immediately; a running job is signalled and its subprocess killed, so
    /// the terminal state lands within one stage's duration.
    pub async fn cancel(&self, job_id: &JobId) -> CancelOutcome {
        let record = match self.store.get(job_id) {
            Ok(record) => record,
            Err(_) => return CancelOutcome::NotFound,
        };
        if record.status.is_terminal() {
            return CancelOutcome::AlreadyTerminal;
        }

        match self.queue.cancel(job_id).await {
            QueueCancel::Removed => {
                // Never dispatched; the record can be finalized right here.
                if let Err(e) = self.store.update(
                    job_id,
                    record.attempt,
                    RecordPatch::new()
                        .status(JobStatus::Cancelled)
                        .finished_now(),
                ) {
                    warn!(job_id = %job_id, error = %e, "Failed to mark removed job cancelled");
                }
                self.registry.clear(job_id);
                info!(job_id = %job_id, "Pending job cancelled");
                self.telemetry.emit(TelemetryEvent::JobFinished {
                    job_id: job_id.clone(),
                    status: JobStatus::Cancelled,
                    attempt: record.attempt,
                });
                CancelOutcome::Accepted
            }
            QueueCancel::NotPending => {
                // Dispatched: cooperative cancellation through the registry.
                self.registry.request(job_id);
                info!(job_id = %job_id, "Cancellation requested for running job");

                // The job may have finished between the status read and the
                // request; report the no-op instead of a phantom accept.
                if let Ok(record) = self.store.get(job_id) {
                    if record.status.is_terminal() {
                        self.registry.clear(job_id);
                        return CancelOutcome::AlreadyTerminal;
                    }
                }
                CancelOutcome::Accepted
            }
        }
    }

    /// Removes a record. Pending and terminal jobs only; a pending job
    /// should normally be cancelled instead.
    pub fn remove(&self, job_id: &JobId) -> Result<(), ServiceError> {
        self.store.remove(job_id)?;
        Ok(())
    }

    /// Operational counters.
    pub async fn stats(&self) -> ServiceStats {
        let counts = self.store.status_counts();
        let get = |status: JobStatus| counts.get(&status).copied().unwrap_or(0);
        ServiceStats {
            queue: self.queue.stats().await,
            pending: get(JobStatus::Pending),
            running: get(JobStatus::Running),
            completed: get(JobStatus::Completed),
            failed: get(JobStatus::Failed),
            cancelled: get(JobStatus::Cancelled),
            total: counts.values().sum(),
        }
    }

    /// Graceful shutdown: stops dispatch, lets in-flight jobs finish, and
    /// waits for all workers to exit.
    pub async fn shutdown(mut self) {
        info!("Shutting down conversion service");
        self.queue.close();
        if let Some(pool) = self.pool.take() {
            pool.join().await;
        }
    }
}
