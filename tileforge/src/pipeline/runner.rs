//! The per-job conversion pipeline.
//!
//! Runs the fixed stage sequence for one attempt, aggregating per-stage
//! fractions into the job's 0-100 progress and pushing every update through
//! the store's compare-and-set. Cancellation is checked before each stage;
//! within a stage the runner kills the subprocess when the token fires. The
//! working directory is removed on every exit path.

use super::error::{PipelineError, PipelineOutcome};
use super::workdir::Workdir;
use crate::job::{JobDescriptor, JobId, RecordPatch, ResultRef};
use crate::stage::{
    build_stage_sequence, StageContext, StageKind, StageOutcome, StageRunner, ToolPaths,
};
use crate::store::{JobStore, StoreError};
use crate::telemetry::{TelemetryEvent, TelemetrySink};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Executes the stage sequence for one job attempt.
pub struct ConversionPipeline {
    store: Arc<dyn JobStore>,
    runner: Arc<dyn StageRunner>,
    telemetry: Arc<dyn TelemetrySink>,
    temp_dir: PathBuf,
    results_dir: PathBuf,
    tools: ToolPaths,
    stage_timeout: Duration,
}

impl ConversionPipeline {
    /// Creates a pipeline bound to its collaborators.
    pub fn new(
        store: Arc<dyn JobStore>,
        runner: Arc<dyn StageRunner>,
        telemetry: Arc<dyn TelemetrySink>,
        temp_dir: PathBuf,
        results_dir: PathBuf,
        tools: ToolPaths,
        stage_timeout: Duration,
    ) -> Self {
        Self {
            store,
            runner,
            telemetry,
            temp_dir,
            results_dir,
            tools,
            stage_timeout,
        }
    }

    /// Runs all stages for `attempt` of the given job.
    ///
    /// The working directory is created up front and removed before
    /// returning, whatever the outcome.
    pub async fn run(
        &self,
        descriptor: &JobDescriptor,
        attempt: u32,
        cancel: CancellationToken,
    ) -> PipelineOutcome {
        let workdir = match Workdir::create(&self.temp_dir, &descriptor.job_id).await {
            Ok(workdir) => workdir,
            Err(e) => {
                return PipelineOutcome::Failed(PipelineError::Resource(format!(
                    "failed to create working directory: {}",
                    e
                )));
            }
        };

        let outcome = self
            .run_stages(descriptor, attempt, &cancel, workdir.path())
            .await;
        workdir.remove().await;
        outcome
    }

    async fn run_stages(
        &self,
        descriptor: &JobDescriptor,
        attempt: u32,
        cancel: &CancellationToken,
        workdir: &Path,
    ) -> PipelineOutcome {
        let stages = build_stage_sequence(&descriptor.source, &descriptor.options, &self.tools);
        let job_id = &descriptor.job_id;
        let last_progress = Arc::new(AtomicU8::new(0));
        let mut result: Option<ResultRef> = None;

        for spec in &stages {
            // The stage boundary is the cancellation checkpoint.
            if cancel.is_cancelled() {
                info!(job_id = %job_id, stage = %spec.kind, "Cancellation observed at stage boundary");
                return PipelineOutcome::Cancelled;
            }

            let kind = spec.kind;
            let base = kind.progress_base();
            let weight = kind.weight();

            self.patch_record(
                job_id,
                attempt,
                RecordPatch::new().current_stage(kind).progress(base),
            );
            self.telemetry.emit(TelemetryEvent::StageStarted {
                job_id: job_id.clone(),
                stage: kind,
            });
            debug!(job_id = %job_id, stage = %kind, attempt, "Stage starting");

            let ctx = StageContext {
                job_id: job_id.clone(),
                source: descriptor.source.clone(),
                workdir: workdir.to_path_buf(),
                results_dir: self.results_dir.clone(),
                cancel: cancel.clone(),
                stage_timeout: self.stage_timeout,
            };

            let on_progress = {
                let store = Arc::clone(&self.store);
                let job_id = job_id.clone();
                let last = Arc::clone(&last_progress);
                move |frac: f64| {
                    let scaled = (weight as f64 * frac.clamp(0.0, 1.0)) as u8;
                    let overall = (base + scaled.min(weight)).min(100);
                    // Only hit the store when the integer value moves forward.
                    if overall > last.load(Ordering::Relaxed) {
                        last.store(overall, Ordering::Relaxed);
                        if let Err(e) =
                            store.update(&job_id, attempt, RecordPatch::new().progress(overall))
                        {
                            debug!(job_id = %job_id, error = %e, "Dropped progress update");
                        }
                    }
                }
            };

            let started = Instant::now();
            match self.runner.run(spec, &ctx, &on_progress).await {
                StageOutcome::Success { outputs } => {
                    let completed = (base + weight).min(100);
                    last_progress.store(completed, Ordering::Relaxed);
                    self.patch_record(job_id, attempt, RecordPatch::new().progress(completed));
                    self.telemetry.emit(TelemetryEvent::StageCompleted {
                        job_id: job_id.clone(),
                        stage: kind,
                        duration: started.elapsed(),
                    });
                    debug!(
                        job_id = %job_id,
                        stage = %kind,
                        duration_ms = started.elapsed().as_millis() as u64,
                        "Stage completed"
                    );

                    if kind == StageKind::Finalize {
                        match self.describe_artifact(outputs).await {
                            Ok(artifact) => result = Some(artifact),
                            Err(error) => return PipelineOutcome::Failed(error),
                        }
                    }
                }
                StageOutcome::Cancelled => {
                    info!(job_id = %job_id, stage = %kind, "Stage cancelled");
                    return PipelineOutcome::Cancelled;
                }
                StageOutcome::Failed {
                    exit_code,
                    message,
                    stderr_tail,
                } => {
                    let detail = compose_error(&message, &stderr_tail);
                    let error = if kind == StageKind::Validate {
                        PipelineError::Validation(detail)
                    } else {
                        PipelineError::Stage {
                            stage: kind,
                            exit_code,
                            message: detail,
                        }
                    };
                    return PipelineOutcome::Failed(error);
                }
            }
        }

        match result {
            Some(result) => PipelineOutcome::Completed(result),
            None => PipelineOutcome::Failed(PipelineError::Stage {
                stage: StageKind::Finalize,
                exit_code: None,
                message: "finalize completed without publishing an artifact".to_string(),
            }),
        }
    }

    /// Builds the result reference from the finalize stage's outputs.
    async fn describe_artifact(
        &self,
        outputs: Vec<PathBuf>,
    ) -> Result<ResultRef, PipelineError> {
        let Some(path) = outputs.into_iter().next() else {
            return Err(PipelineError::Stage {
                stage: StageKind::Finalize,
                exit_code: None,
                message: "finalize completed without publishing an artifact".to_string(),
            });
        };
        let size_bytes = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata.len(),
            Err(e) => {
                return Err(PipelineError::Stage {
                    stage: StageKind::Finalize,
                    exit_code: None,
                    message: format!("published artifact {} is unreadable: {}", path.display(), e),
                });
            }
        };
        Ok(ResultRef { path, size_bytes })
    }

    /// Applies a record patch, tolerating supersession.
    ///
    /// A `Stale` rejection means a newer attempt owns the record; this
    /// attempt's updates are simply dropped. Other store errors are logged.
    fn patch_record(&self, job_id: &JobId, attempt: u32, patch: RecordPatch) {
        match self.store.update(job_id, attempt, patch) {
            Ok(_) => {}
            Err(StoreError::Stale { .. }) => {
                debug!(job_id = %job_id, attempt, "Record update from superseded attempt dropped");
            }
            Err(e) => {
                warn!(job_id = %job_id, attempt, error = %e, "Failed to update job record");
            }
        }
    }
}

/// Joins a failure message with the tool's trailing stderr lines.
fn compose_error(message: &str, stderr_tail: &[String]) -> String {
    let tail: Vec<&str> = stderr_tail
        .iter()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .collect();
    if tail.is_empty() {
        message.to_string()
    } else {
        format!("{}: {}", message, tail.join(" | "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{ConvertOptions, JobStatus};
    use crate::stage::{StageSpec, ARCHIVE_NAME};
    use crate::store::MemoryJobStore;
    use crate::telemetry::NullTelemetrySink;
    use async_trait::async_trait;

    /// Fake runner that succeeds every stage, writing the finalize artifact.
    struct AlwaysSucceed;

    #[async_trait]
    impl StageRunner for AlwaysSucceed {
        async fn run(
            &self,
            spec: &StageSpec,
            ctx: &StageContext,
            on_progress: &(dyn Fn(f64) + Send + Sync),
        ) -> StageOutcome {
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

    /// Fake runner that fails one specific stage.
    struct FailAt(StageKind);

    #[async_trait]
    impl StageRunner for FailAt {
        async fn run(
            &self,
            spec: &StageSpec,
            _ctx: &StageContext,
            _on_progress: &(dyn Fn(f64) + Send + Sync),
        ) -> StageOutcome {
            if spec.kind == self.0 {
                StageOutcome::Failed {
                    exit_code: Some(1),
                    message: format!("{} exited with code 1", spec.kind),
                    stderr_tail: vec!["something broke".to_string()],
                }
            } else if spec.kind == StageKind::Finalize {
                StageOutcome::Success {
                    outputs: vec![PathBuf::from("/nonexistent")],
                }
            } else {
                StageOutcome::Success { outputs: vec![] }
            }
        }
    }

    fn pipeline(runner: Arc<dyn StageRunner>, root: &Path) -> (ConversionPipeline, Arc<MemoryJobStore>) {
        let store = Arc::new(MemoryJobStore::new());
        let pipeline = ConversionPipeline::new(
            Arc::clone(&store) as Arc<dyn JobStore>,
            runner,
            Arc::new(NullTelemetrySink),
            root.join("temp"),
            root.join("results"),
            ToolPaths::default(),
            Duration::from_secs(5),
        );
        (pipeline, store)
    }

    fn running_descriptor(store: &MemoryJobStore, id: &str) -> JobDescriptor {
        let descriptor = JobDescriptor::new(
            JobId::new(id),
            PathBuf::from("/data/region.pbf"),
            ConvertOptions::default(),
        );
        store.create(&descriptor).unwrap();
        store
            .update(
                &descriptor.job_id,
                1,
                RecordPatch::new().status(JobStatus::Running),
            )
            .unwrap();
        descriptor
    }

    #[tokio::test]
    async fn test_all_stages_complete() {
        let root = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("temp")).unwrap();
        let (pipeline, store) = pipeline(Arc::new(AlwaysSucceed), root.path());
        let descriptor = running_descriptor(&store, "ok");

        let outcome = pipeline
            .run(&descriptor, 1, CancellationToken::new())
            .await;

        match outcome {
            PipelineOutcome::Completed(result) => {
                assert!(result.path.ends_with("ok.pmtiles"));
                assert_eq!(result.size_bytes, "fake-archive".len() as u64);
            }
            other => panic!("expected completion, got {:?}", other),
        }
        assert_eq!(store.get(&descriptor.job_id).unwrap().progress, 100);
        // Working directory cleaned up.
        assert!(!root.path().join("temp").join("ok").exists());
    }

    #[tokio::test]
    async fn test_tile_failure_is_retryable() {
        let root = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("temp")).unwrap();
        let (pipeline, store) = pipeline(Arc::new(FailAt(StageKind::Tile)), root.path());
        let descriptor = running_descriptor(&store, "tilefail");

        let outcome = pipeline
            .run(&descriptor, 1, CancellationToken::new())
            .await;

        match outcome {
            PipelineOutcome::Failed(error) => {
                assert!(error.is_retryable());
                assert_eq!(error.stage(), StageKind::Tile);
                assert!(error.to_string().contains("something broke"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(!root.path().join("temp").join("tilefail").exists());
    }

    #[tokio::test]
    async fn test_validate_failure_is_not_retryable() {
        let root = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("temp")).unwrap();
        let (pipeline, store) = pipeline(Arc::new(FailAt(StageKind::Validate)), root.path());
        let descriptor = running_descriptor(&store, "badsource");

        let outcome = pipeline
            .run(&descriptor, 1, CancellationToken::new())
            .await;

        match outcome {
            PipelineOutcome::Failed(error) => {
                assert!(!error.is_retryable());
                assert!(matches!(error, PipelineError::Validation(_)));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_pre_cancelled_token_stops_before_first_stage() {
        let root = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("temp")).unwrap();
        let (pipeline, store) = pipeline(Arc::new(AlwaysSucceed), root.path());
        let descriptor = running_descriptor(&store, "precancel");

        let token = CancellationToken::new();
        token.cancel();
        let outcome = pipeline.run(&descriptor, 1, token).await;

        assert!(matches!(outcome, PipelineOutcome::Cancelled));
        assert_eq!(store.get(&descriptor.job_id).unwrap().progress, 0);
        assert!(!root.path().join("temp").join("precancel").exists());
    }

    #[test]
    fn test_compose_error_with_tail() {
        let detail = compose_error(
            "tippecanoe exited with code 1",
            &["".to_string(), "out of memory".to_string()],
        );
        assert_eq!(detail, "tippecanoe exited with code 1: out of memory");
    }

    #[test]
    fn test_compose_error_without_tail() {
        assert_eq!(compose_error("spawn failed", &[]), "spawn failed");
    }

    #[tokio::test]
    async fn test_finalize_without_artifact_fails() {
        struct EmptyFinalize;

        #[async_trait]
        impl StageRunner for EmptyFinalize {
            async fn run(
                &self,
                _spec: &StageSpec,
                _ctx: &StageContext,
                _on_progress: &(dyn Fn(f64) + Send + Sync),
            ) -> StageOutcome {
                StageOutcome::Success { outputs: vec![] }
            }
        }

        let root = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("temp")).unwrap();
        let (pipeline, store) = pipeline(Arc::new(EmptyFinalize), root.path());
        let descriptor = running_descriptor(&store, "noartifact");

        let outcome = pipeline
            .run(&descriptor, 1, CancellationToken::new())
            .await;
        match outcome {
            PipelineOutcome::Failed(PipelineError::Stage { stage, .. }) => {
                assert_eq!(stage, StageKind::Finalize);
            }
            other => panic!("expected finalize failure, got {:?}", other),
        }
    }

    #[test]
    fn test_archive_name_constant_matches_publish() {
        // The package stage's declared output is what publish copies.
        assert_eq!(ARCHIVE_NAME, "tiles.pmtiles");
    }
}
