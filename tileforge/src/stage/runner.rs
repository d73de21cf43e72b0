//! Stage execution: in-process checks and external tool subprocesses.
//!
//! [`StageRunner`] is the seam between the pipeline and the outside world;
//! integration tests substitute a fake implementation. The real
//! [`ProcessStageRunner`] spawns each tool with piped stdio, streams output
//! lines through the stage's progress adapter, keeps a tail of recent stderr
//! for error reporting, and enforces cancellation by killing the child and
//! awaiting its exit.

use super::progress::parse_stage_progress;
use super::spec::{StageKind, StageSpec, StageWork, ToolInvocation, ARCHIVE_NAME, RESULT_EXTENSION};
use crate::job::JobId;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How many trailing stderr lines are retained for error reporting.
pub const STDERR_TAIL_LINES: usize = 20;

/// Smallest plausible OSM extract (1 KiB).
pub const MIN_SOURCE_SIZE: u64 = 1024;

/// Largest supported OSM extract (10 GiB).
pub const MAX_SOURCE_SIZE: u64 = 10 * 1024 * 1024 * 1024;

/// Everything a stage needs to execute for one job attempt.
#[derive(Clone, Debug)]
pub struct StageContext {
    /// Job the stage belongs to.
    pub job_id: JobId,

    /// Absolute path of the source extract.
    pub source: PathBuf,

    /// Job-scoped working directory; subprocesses run with this as cwd.
    pub workdir: PathBuf,

    /// Directory the finalize stage publishes the archive into.
    pub results_dir: PathBuf,

    /// Cancellation token for this attempt. A running subprocess is killed
    /// when it fires.
    pub cancel: CancellationToken,

    /// Ceiling on one stage's wall-clock duration, guarding against hung
    /// tools.
    pub stage_timeout: Duration,
}

/// Result of running one stage.
#[derive(Debug)]
pub enum StageOutcome {
    /// Stage finished; `outputs` are the absolute paths of its artifacts.
    Success { outputs: Vec<PathBuf> },

    /// Stage failed to start, exited non-zero, timed out, or produced no
    /// artifact.
    Failed {
        /// Exit code, if the tool started and exited.
        exit_code: Option<i32>,
        /// One-line description of what went wrong.
        message: String,
        /// Trailing stderr lines from the tool, oldest first.
        stderr_tail: Vec<String>,
    },

    /// The attempt's cancellation token fired; any subprocess was killed and
    /// awaited before this was returned.
    Cancelled,
}

impl StageOutcome {
    fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            exit_code: None,
            message: message.into(),
            stderr_tail: Vec::new(),
        }
    }
}

/// Executes one stage of the conversion pipeline.
#[async_trait]
pub trait StageRunner: Send + Sync {
    /// Runs the stage to completion, cancellation, or failure.
    ///
    /// `on_progress` receives the stage's fractional progress (0.0-1.0),
    /// invoked at most once per output line; it must be cheap and must never
    /// block, since it runs on the line-streaming path.
    async fn run(
        &self,
        spec: &StageSpec,
        ctx: &StageContext,
        on_progress: &(dyn Fn(f64) + Send + Sync),
    ) -> StageOutcome;
}

/// The production runner: in-process work for validate/finalize, subprocesses
/// for everything else.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessStageRunner;

#[async_trait]
impl StageRunner for ProcessStageRunner {
    async fn run(
        &self,
        spec: &StageSpec,
        ctx: &StageContext,
        on_progress: &(dyn Fn(f64) + Send + Sync),
    ) -> StageOutcome {
        match &spec.work {
            StageWork::CheckSource => check_source(ctx).await,
            StageWork::RunTools(invocations) => {
                run_tools(spec, invocations, ctx, on_progress).await
            }
            StageWork::PublishArchive => publish_archive(ctx).await,
        }
    }
}

/// Validates the source extract: exists, regular file, size bounds, known
/// extension. Failures here are classified non-retryable by the pipeline.
async fn check_source(ctx: &StageContext) -> StageOutcome {
    let metadata = match tokio::fs::metadata(&ctx.source).await {
        Ok(metadata) => metadata,
        Err(e) => {
            return StageOutcome::failed(format!(
                "source file not found: {}: {}",
                ctx.source.display(),
                e
            ));
        }
    };

    if !metadata.is_file() {
        return StageOutcome::failed(format!("source is not a regular file: {}", ctx.source.display()));
    }
    if metadata.len() < MIN_SOURCE_SIZE {
        return StageOutcome::failed(format!(
            "source too small to be a valid OSM extract ({} bytes, minimum {})",
            metadata.len(),
            MIN_SOURCE_SIZE
        ));
    }
    if metadata.len() > MAX_SOURCE_SIZE {
        return StageOutcome::failed(format!(
            "source too large ({} bytes, maximum {})",
            metadata.len(),
            MAX_SOURCE_SIZE
        ));
    }

    let name = ctx
        .source
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if !name.ends_with(".pbf") && !name.ends_with(".osm") {
        return StageOutcome::failed(format!(
            "unsupported source format '{}' (expected .pbf or .osm)",
            name
        ));
    }

    StageOutcome::Success { outputs: vec![] }
}

/// Runs the stage's tool invocations in order under a shared stage deadline.
///
/// Stage fraction advances as `completed / total` across invocations, plus
/// the current tool's own line-reported fraction scaled into its slot.
async fn run_tools(
    spec: &StageSpec,
    invocations: &[ToolInvocation],
    ctx: &StageContext,
    on_progress: &(dyn Fn(f64) + Send + Sync),
) -> StageOutcome {
    let deadline = Instant::now() + ctx.stage_timeout;
    let total = invocations.len().max(1) as f64;

    for (index, invocation) in invocations.iter().enumerate() {
        if ctx.cancel.is_cancelled() {
            return StageOutcome::Cancelled;
        }

        let completed = index as f64;
        let tool_progress = |frac: f64| {
            on_progress((completed + frac.clamp(0.0, 1.0)) / total);
        };

        match run_tool(spec.kind, invocation, ctx, deadline, &tool_progress).await {
            StageOutcome::Success { .. } => {
                on_progress((completed + 1.0) / total);
            }
            other => return other,
        }
    }

    verify_outputs(spec, ctx).await
}

/// Spawns one tool, streams its output, and maps its exit status.
async fn run_tool(
    kind: StageKind,
    invocation: &ToolInvocation,
    ctx: &StageContext,
    deadline: Instant,
    on_progress: &(dyn Fn(f64) + Send + Sync),
) -> StageOutcome {
    debug!(
        job_id = %ctx.job_id,
        stage = %kind,
        tool = %invocation.program.display(),
        label = %invocation.label,
        "Starting stage tool"
    );

    let mut child = match Command::new(&invocation.program)
        .args(&invocation.args)
        .current_dir(&ctx.workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            return StageOutcome::failed(format!(
                "failed to start {}: {}",
                invocation.program.display(),
                e
            ));
        }
    };

    let Some(stdout) = child.stdout.take() else {
        return StageOutcome::failed("stdout pipe missing on spawned tool");
    };
    let Some(stderr) = child.stderr.take() else {
        return StageOutcome::failed("stderr pipe missing on spawned tool");
    };

    let mut out_lines = BufReader::new(stdout).lines();
    let mut err_lines = BufReader::new(stderr).lines();
    let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
    let mut out_done = false;
    let mut err_done = false;

    // Drain both pipes first; exit status is collected afterwards so the
    // child can never block on a full pipe.
    while !(out_done && err_done) {
        tokio::select! {
            _ = ctx.cancel.cancelled() => {
                return kill_child(&mut child, ctx, &invocation.label).await;
            }
            _ = tokio::time::sleep_until(deadline) => {
                return timeout_child(&mut child, ctx, invocation, std::mem::take(&mut tail)).await;
            }
            line = out_lines.next_line(), if !out_done => {
                match line {
                    Ok(Some(line)) => {
                        if let Some(frac) = parse_stage_progress(kind, &line) {
                            on_progress(frac);
                        }
                    }
                    _ => out_done = true,
                }
            }
            line = err_lines.next_line(), if !err_done => {
                match line {
                    Ok(Some(line)) => {
                        if let Some(frac) = parse_stage_progress(kind, &line) {
                            on_progress(frac);
                        }
                        if tail.len() == STDERR_TAIL_LINES {
                            tail.pop_front();
                        }
                        tail.push_back(line);
                    }
                    _ => err_done = true,
                }
            }
        }
    }

    let status = tokio::select! {
        _ = ctx.cancel.cancelled() => {
            return kill_child(&mut child, ctx, &invocation.label).await;
        }
        _ = tokio::time::sleep_until(deadline) => {
            return timeout_child(&mut child, ctx, invocation, std::mem::take(&mut tail)).await;
        }
        status = child.wait() => status,
    };

    match status {
        Ok(status) if status.success() => StageOutcome::Success { outputs: vec![] },
        Ok(status) => StageOutcome::Failed {
            exit_code: status.code(),
            message: match status.code() {
                Some(code) => format!("{} exited with code {}", invocation.label, code),
                None => format!("{} terminated by signal", invocation.label),
            },
            stderr_tail: tail.into(),
        },
        Err(e) => StageOutcome::Failed {
            exit_code: None,
            message: format!("failed to wait for {}: {}", invocation.label, e),
            stderr_tail: tail.into(),
        },
    }
}

/// Kills a cancelled child and awaits its exit before reporting.
async fn kill_child(
    child: &mut tokio::process::Child,
    ctx: &StageContext,
    label: &str,
) -> StageOutcome {
    warn!(job_id = %ctx.job_id, tool = %label, "Killing stage tool on cancellation");
    if let Err(e) = child.kill().await {
        warn!(job_id = %ctx.job_id, tool = %label, error = %e, "Failed to kill stage tool");
    }
    StageOutcome::Cancelled
}

/// Kills a child that blew through the stage deadline.
async fn timeout_child(
    child: &mut tokio::process::Child,
    ctx: &StageContext,
    invocation: &ToolInvocation,
    tail: VecDeque<String>,
) -> StageOutcome {
    warn!(
        job_id = %ctx.job_id,
        tool = %invocation.label,
        timeout_secs = ctx.stage_timeout.as_secs(),
        "Stage tool hit timeout ceiling, killing"
    );
    if let Err(e) = child.kill().await {
        warn!(job_id = %ctx.job_id, error = %e, "Failed to kill timed-out tool");
    }
    StageOutcome::Failed {
        exit_code: None,
        message: format!(
            "{} timed out after {}s",
            invocation.label,
            ctx.stage_timeout.as_secs()
        ),
        stderr_tail: tail.into(),
    }
}

/// Verifies a subprocess stage produced its declared artifacts.
async fn verify_outputs(spec: &StageSpec, ctx: &StageContext) -> StageOutcome {
    let mut outputs = Vec::with_capacity(spec.outputs.len());
    for relative in &spec.outputs {
        let path = ctx.workdir.join(relative);
        match tokio::fs::metadata(&path).await {
            Ok(_) => outputs.push(path),
            Err(_) => {
                return StageOutcome::failed(format!(
                    "{} completed without producing {}",
                    spec.kind,
                    relative.display()
                ));
            }
        }
    }
    StageOutcome::Success { outputs }
}

/// Copies the packaged archive into the results directory.
async fn publish_archive(ctx: &StageContext) -> StageOutcome {
    let archive = ctx.workdir.join(ARCHIVE_NAME);
    let destination = ctx
        .results_dir
        .join(format!("{}.{}", ctx.job_id, RESULT_EXTENSION));

    if let Err(e) = tokio::fs::create_dir_all(&ctx.results_dir).await {
        return StageOutcome::failed(format!(
            "failed to create results directory {}: {}",
            ctx.results_dir.display(),
            e
        ));
    }
    if let Err(e) = tokio::fs::copy(&archive, &destination).await {
        return StageOutcome::failed(format!(
            "failed to publish archive to {}: {}",
            destination.display(),
            e
        ));
    }

    StageOutcome::Success {
        outputs: vec![destination],
    }
}
