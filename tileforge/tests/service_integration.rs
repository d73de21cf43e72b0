//! Integration tests for the conversion service.
//!
//! These tests exercise the full submit → queue → worker → pipeline → store
//! path against a fake stage runner:
//! - Terminal convergence and weighted progress aggregation
//! - Cancellation of pending and running jobs
//! - Retry with backoff up to the attempt budget
//! - Non-retryable validation failures
//! - Graceful shutdown

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tileforge::config::ConfigFile;
use tileforge::job::{ConvertOptions, JobId, JobStatus};
use tileforge::service::{CancelOutcome, ConversionService, SubmitError};
use tileforge::stage::{StageContext, StageKind, StageOutcome, StageRunner, StageSpec};
use tileforge::store::{JobStore, ListQuery, MemoryJobStore};
use tileforge::telemetry::NullTelemetrySink;
use tokio::sync::Notify;

// =============================================================================
// Test Helpers
// =============================================================================

/// Configurable fake stage runner.
///
/// Succeeds every stage by default, writing a small artifact at finalize so
/// the result reference resolves. Can be told to fail a stage a number of
/// times, or to hold a stage open until released (respecting cancellation).
struct FakeStageRunner {
    fail_stage: Option<StageKind>,
    /// How many failures to deliver before succeeding; `u32::MAX` = always.
    fail_times: u32,
    failures_delivered: AtomicU32,
    hold_stage: Option<StageKind>,
    hold_entered: Arc<Notify>,
    hold_release: Arc<Notify>,
}

impl FakeStageRunner {
    fn succeeding() -> Self {
        Self {
            fail_stage: None,
            fail_times: 0,
            failures_delivered: AtomicU32::new(0),
            hold_stage: None,
            hold_entered: Arc::new(Notify::new()),
            hold_release: Arc::new(Notify::new()),
        }
    }

    fn failing_at(stage: StageKind, times: u32) -> Self {
        Self {
            fail_stage: Some(stage),
            fail_times: times,
            ..Self::succeeding()
        }
    }

    fn holding_at(stage: StageKind) -> Self {
        Self {
            hold_stage: Some(stage),
            ..Self::succeeding()
        }
    }

    /// Resolves once a job has entered the held stage.
    fn entered(&self) -> Arc<Notify> {
        Arc::clone(&self.hold_entered)
    }

    /// Lets the held stage proceed.
    fn release(&self) {
        self.hold_release.notify_waiters();
    }
}

impl Default for FakeStageRunner {
    fn default() -> Self {
        Self::succeeding()
    }
}

#[async_trait]
impl StageRunner for FakeStageRunner {
    async fn run(
        &self,
        spec: &StageSpec,
        ctx: &StageContext,
        on_progress: &(dyn Fn(f64) + Send + Sync),
    ) -> StageOutcome {
        if self.hold_stage == Some(spec.kind) {
            self.hold_entered.notify_one();
            tokio::select! {
                _ = ctx.cancel.cancelled() => return StageOutcome::Cancelled,
                _ = self.hold_release.notified() => {}
            }
        }

        if self.fail_stage == Some(spec.kind) {
            let delivered = self.failures_delivered.fetch_add(1, Ordering::SeqCst);
            if delivered < self.fail_times {
                return StageOutcome::Failed {
                    exit_code: Some(1),
                    message: format!("{} exited with code 1", spec.kind),
                    stderr_tail: vec!["simulated tool failure".to_string()],
                };
            }
        }

        on_progress(1.0);

        if spec.kind == StageKind::Finalize {
            let path = ctx.results_dir.join(format!("{}.pmtiles", ctx.job_id));
            std::fs::create_dir_all(&ctx.results_dir).unwrap();
            std::fs::write(&path, b"fake-archive").unwrap();
            StageOutcome::Success {
                outputs: vec![path],
            }
        } else {
            StageOutcome::Success { outputs: vec![] }
        }
    }
}

/// A test harness bundling the service with its scratch directories.
struct Harness {
    service: ConversionService,
    store: Arc<MemoryJobStore>,
    root: tempfile::TempDir,
}

impl Harness {
    fn start(runner: Arc<dyn StageRunner>, workers: usize) -> Self {
        let root = tempfile::TempDir::new().unwrap();
        let mut config = ConfigFile::default();
        config.paths.data_dir = root.path().to_path_buf();
        config.paths.temp_dir = root.path().join("temp");
        config.paths.results_dir = root.path().join("tiles");
        config.paths.snapshot = None;
        config.queue.max_attempts = 3;
        config.queue.retry_base_delay_ms = 10;
        config.queue.retry_max_delay_ms = 100;
        config.queue.retry_jitter = false;
        config.workers.count = workers;
        config.workers.stage_timeout_secs = 5;

        let store = Arc::new(MemoryJobStore::new());
        let service = ConversionService::start_with(
            &config,
            Arc::clone(&store) as Arc<dyn JobStore>,
            runner,
            Arc::new(NullTelemetrySink),
        )
        .unwrap();

        Self {
            service,
            store,
            root,
        }
    }

    /// Writes a plausible source extract and returns its path.
    fn source_file(&self) -> PathBuf {
        let path = self.root.path().join("region.osm.pbf");
        std::fs::write(&path, vec![0u8; 2048]).unwrap();
        path
    }

    fn workdir_path(&self, job_id: &JobId) -> PathBuf {
        self.root.path().join("temp").join(job_id.as_str())
    }

    async fn wait_terminal(&self, job_id: &JobId) -> JobStatus {
        wait_for(&self.service, job_id, |status| status.is_terminal()).await
    }
}

/// Polls status until the predicate holds, panicking after a bounded wait.
async fn wait_for(
    service: &ConversionService,
    job_id: &JobId,
    predicate: impl Fn(JobStatus) -> bool,
) -> JobStatus {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let report = service.status(job_id).unwrap();
            if predicate(report.status) {
                return report.status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("job did not reach the expected status in time")
}

// =============================================================================
// Integration Tests
// =============================================================================

#[tokio::test]
async fn test_submitted_job_runs_to_completion() {
    let harness = Harness::start(Arc::new(FakeStageRunner::succeeding()), 2);
    let source = harness.source_file();

    let job_id = harness
        .service
        .submit(&source, ConvertOptions::default())
        .await
        .unwrap();

    assert_eq!(harness.wait_terminal(&job_id).await, JobStatus::Completed);

    let report = harness.service.status(&job_id).unwrap();
    assert_eq!(report.progress, 100);
    assert_eq!(report.attempt, 1);
    assert!(report.error_message.is_none());

    let result = report.result.expect("completed job must carry a result");
    assert!(result.path.ends_with(format!("{}.pmtiles", job_id)));
    assert!(result.path.exists());
    assert_eq!(result.size_bytes, "fake-archive".len() as u64);

    harness.service.shutdown().await;
}

#[tokio::test]
async fn test_invalid_options_rejected_synchronously() {
    let harness = Harness::start(Arc::new(FakeStageRunner::succeeding()), 1);
    let source = harness.source_file();

    let options = ConvertOptions {
        min_zoom: 12,
        max_zoom: 4,
        ..Default::default()
    };
    let result = harness.service.submit(&source, options).await;

    assert!(matches!(result, Err(SubmitError::InvalidOptions(_))));
    // Nothing was recorded.
    assert_eq!(harness.service.list(&ListQuery::default()).total_count, 0);

    harness.service.shutdown().await;
}

#[tokio::test]
async fn test_missing_source_rejected_synchronously() {
    let harness = Harness::start(Arc::new(FakeStageRunner::succeeding()), 1);

    let result = harness
        .service
        .submit("/nonexistent/region.pbf", ConvertOptions::default())
        .await;
    assert!(matches!(result, Err(SubmitError::SourceNotFound(_))));

    harness.service.shutdown().await;
}

#[tokio::test]
async fn test_status_of_unknown_job_is_not_found() {
    let harness = Harness::start(Arc::new(FakeStageRunner::succeeding()), 1);

    assert!(harness.service.status(&JobId::new("ghost")).is_err());
    assert_eq!(
        harness.service.cancel(&JobId::new("ghost")).await,
        CancelOutcome::NotFound
    );

    harness.service.shutdown().await;
}

#[tokio::test]
async fn test_weighted_progress_during_tile_stage() {
    let runner = Arc::new(FakeStageRunner::holding_at(StageKind::Tile));
    let entered = runner.entered();
    let harness = Harness::start(Arc::clone(&runner) as Arc<dyn StageRunner>, 1);
    let source = harness.source_file();

    let job_id = harness
        .service
        .submit(&source, ConvertOptions::default())
        .await
        .unwrap();

    // Wait until the pipeline is inside the tile stage.
    tokio::time::timeout(Duration::from_secs(5), entered.notified())
        .await
        .expect("tile stage never started");

    let report = harness.service.status(&job_id).unwrap();
    assert_eq!(report.status, JobStatus::Running);
    assert_eq!(report.current_stage, Some(StageKind::Tile));
    // validate (10) + extract (30) done, tile (40) not yet complete.
    assert!(
        (40..70).contains(&report.progress),
        "progress {} outside [40, 70)",
        report.progress
    );

    runner.release();
    assert_eq!(harness.wait_terminal(&job_id).await, JobStatus::Completed);
    assert_eq!(harness.service.status(&job_id).unwrap().progress, 100);

    harness.service.shutdown().await;
}

#[tokio::test]
async fn test_cancel_pending_job_never_runs() {
    let runner = Arc::new(FakeStageRunner::holding_at(StageKind::Tile));
    let entered = runner.entered();
    let harness = Harness::start(Arc::clone(&runner) as Arc<dyn StageRunner>, 1);
    let source = harness.source_file();

    // Occupy the single worker, then park a second job in the queue.
    let blocker = harness
        .service
        .submit(&source, ConvertOptions::default())
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), entered.notified())
        .await
        .expect("blocker never started");

    let parked = harness
        .service
        .submit(&source, ConvertOptions::default())
        .await
        .unwrap();

    assert_eq!(
        harness.service.cancel(&parked).await,
        CancelOutcome::Accepted
    );

    let report = harness.service.status(&parked).unwrap();
    assert_eq!(report.status, JobStatus::Cancelled);
    // Never dispatched: no attempt ever began.
    assert!(harness.service.record(&parked).unwrap().started_at.is_none());

    // Not in the pending listing.
    let pending = harness
        .service
        .list(&ListQuery::default().with_status(JobStatus::Pending));
    assert!(pending.records.iter().all(|r| r.job_id != parked));

    runner.release();
    assert_eq!(harness.wait_terminal(&blocker).await, JobStatus::Completed);
    harness.service.shutdown().await;
}

#[tokio::test]
async fn test_cancel_running_job_within_one_stage() {
    let runner = Arc::new(FakeStageRunner::holding_at(StageKind::Tile));
    let entered = runner.entered();
    let harness = Harness::start(Arc::clone(&runner) as Arc<dyn StageRunner>, 1);
    let source = harness.source_file();

    let job_id = harness
        .service
        .submit(&source, ConvertOptions::default())
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), entered.notified())
        .await
        .expect("tile stage never started");

    assert_eq!(
        harness.service.cancel(&job_id).await,
        CancelOutcome::Accepted
    );
    assert_eq!(harness.wait_terminal(&job_id).await, JobStatus::Cancelled);

    let report = harness.service.status(&job_id).unwrap();
    assert!(report.error_message.is_none(), "cancelled jobs expose no error");
    assert!(report.result.is_none());

    // The job-scoped working directory is gone.
    assert!(!harness.workdir_path(&job_id).exists());

    // Cancellation is idempotent.
    assert_eq!(
        harness.service.cancel(&job_id).await,
        CancelOutcome::AlreadyTerminal
    );

    harness.service.shutdown().await;
}

#[tokio::test]
async fn test_retryable_failure_exhausts_attempts() {
    let runner = Arc::new(FakeStageRunner::failing_at(StageKind::Tile, u32::MAX));
    let harness = Harness::start(runner, 1);
    let source = harness.source_file();

    let job_id = harness
        .service
        .submit(&source, ConvertOptions::default())
        .await
        .unwrap();

    assert_eq!(harness.wait_terminal(&job_id).await, JobStatus::Failed);

    let report = harness.service.status(&job_id).unwrap();
    assert_eq!(report.attempt, 3, "all attempts consumed");
    assert_eq!(report.failed_stage, Some(StageKind::Tile));
    let message = report.error_message.expect("failed job must carry an error");
    assert!(message.contains("tile"));

    harness.service.shutdown().await;
}

#[tokio::test]
async fn test_retry_succeeds_after_transient_failures() {
    let runner = Arc::new(FakeStageRunner::failing_at(StageKind::Tile, 2));
    let harness = Harness::start(runner, 1);
    let source = harness.source_file();

    let job_id = harness
        .service
        .submit(&source, ConvertOptions::default())
        .await
        .unwrap();

    assert_eq!(harness.wait_terminal(&job_id).await, JobStatus::Completed);

    let report = harness.service.status(&job_id).unwrap();
    assert_eq!(report.attempt, 3, "two failures then success");
    assert_eq!(report.progress, 100);
    assert!(report.error_message.is_none(), "errors reset on the new attempt");

    harness.service.shutdown().await;
}

#[tokio::test]
async fn test_validation_failure_never_consumes_retries() {
    let runner = Arc::new(FakeStageRunner::failing_at(StageKind::Validate, u32::MAX));
    let harness = Harness::start(runner, 1);
    let source = harness.source_file();

    let job_id = harness
        .service
        .submit(&source, ConvertOptions::default())
        .await
        .unwrap();

    assert_eq!(harness.wait_terminal(&job_id).await, JobStatus::Failed);

    let report = harness.service.status(&job_id).unwrap();
    assert_eq!(report.attempt, 1, "validation failures are terminal");
    assert_eq!(report.failed_stage, Some(StageKind::Validate));

    harness.service.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_job_id_rejected() {
    let runner = Arc::new(FakeStageRunner::holding_at(StageKind::Validate));
    let entered = runner.entered();
    let harness = Harness::start(Arc::clone(&runner) as Arc<dyn StageRunner>, 1);
    let source = harness.source_file();

    harness
        .service
        .submit_with_id(JobId::new("fixed-id"), &source, ConvertOptions::default())
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), entered.notified())
        .await
        .expect("job never started");

    let result = harness
        .service
        .submit_with_id(JobId::new("fixed-id"), &source, ConvertOptions::default())
        .await;
    assert!(matches!(result, Err(SubmitError::DuplicateJob(_))));

    runner.release();
    assert_eq!(
        harness.wait_terminal(&JobId::new("fixed-id")).await,
        JobStatus::Completed
    );
    harness.service.shutdown().await;
}

#[tokio::test]
async fn test_stats_reflect_terminal_states() {
    let harness = Harness::start(Arc::new(FakeStageRunner::succeeding()), 2);
    let source = harness.source_file();

    let a = harness
        .service
        .submit(&source, ConvertOptions::default())
        .await
        .unwrap();
    let b = harness
        .service
        .submit(&source, ConvertOptions::default())
        .await
        .unwrap();

    harness.wait_terminal(&a).await;
    harness.wait_terminal(&b).await;

    let stats = harness.service.stats().await;
    assert_eq!(stats.completed, 2);
    assert_eq!(stats.total, 2);
    assert_eq!(stats.queue.pending, 0);
    assert_eq!(stats.queue.dispatched, 0);

    harness.service.shutdown().await;
}

#[tokio::test]
async fn test_list_pagination_and_sorting() {
    let harness = Harness::start(Arc::new(FakeStageRunner::succeeding()), 2);
    let source = harness.source_file();

    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(
            harness
                .service
                .submit(&source, ConvertOptions::default())
                .await
                .unwrap(),
        );
    }
    for id in &ids {
        harness.wait_terminal(id).await;
    }

    let page = harness.service.list(
        &ListQuery::default()
            .with_status(JobStatus::Completed)
            .page(1)
            .page_size(2),
    );
    assert_eq!(page.total_count, 5);
    assert_eq!(page.records.len(), 2);

    let last = harness.service.list(
        &ListQuery::default()
            .with_status(JobStatus::Completed)
            .page(3)
            .page_size(2),
    );
    assert_eq!(last.records.len(), 1);

    harness.service.shutdown().await;
}

#[tokio::test]
async fn test_graceful_shutdown_finishes_in_flight_job() {
    let harness = Harness::start(Arc::new(FakeStageRunner::succeeding()), 1);
    let source = harness.source_file();

    let job_id = harness
        .service
        .submit(&source, ConvertOptions::default())
        .await
        .unwrap();

    // Shut down immediately; the worker must still drive the dequeued job
    // to a terminal state before exiting.
    let store = Arc::clone(&harness.store);
    tokio::time::timeout(Duration::from_secs(10), harness.service.shutdown())
        .await
        .expect("shutdown hung");

    let record = store.get(&job_id).unwrap();
    assert!(
        record.status == JobStatus::Completed || record.status == JobStatus::Pending,
        "job must be finished or untouched, got {}",
        record.status
    );
}
