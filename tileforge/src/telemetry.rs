//! Telemetry for job execution observability.
//!
//! Components emit structured events via a sink abstraction and don't know
//! how events are consumed ("emit, don't present"). Consumers — logging,
//! metrics, a future API layer — decide how to surface them.

use crate::job::{JobId, JobStatus};
use crate::stage::StageKind;
use std::time::Duration;

/// Events emitted during job execution.
#[derive(Clone, Debug)]
pub enum TelemetryEvent {
    /// A job was accepted into the queue.
    JobSubmitted { job_id: JobId },

    /// A worker began an attempt.
    AttemptStarted { job_id: JobId, attempt: u32 },

    /// A pipeline stage began.
    StageStarted { job_id: JobId, stage: StageKind },

    /// A pipeline stage finished successfully.
    StageCompleted {
        job_id: JobId,
        stage: StageKind,
        duration: Duration,
    },

    /// A retryable failure was rescheduled.
    RetryScheduled {
        job_id: JobId,
        next_attempt: u32,
        delay: Duration,
    },

    /// The job reached a terminal status.
    JobFinished {
        job_id: JobId,
        status: JobStatus,
        attempt: u32,
    },
}

impl TelemetryEvent {
    /// The job this event concerns.
    pub fn job_id(&self) -> &JobId {
        match self {
            Self::JobSubmitted { job_id }
            | Self::AttemptStarted { job_id, .. }
            | Self::StageStarted { job_id, .. }
            | Self::StageCompleted { job_id, .. }
            | Self::RetryScheduled { job_id, .. }
            | Self::JobFinished { job_id, .. } => job_id,
        }
    }

    /// Short name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::JobSubmitted { .. } => "job_submitted",
            Self::AttemptStarted { .. } => "attempt_started",
            Self::StageStarted { .. } => "stage_started",
            Self::StageCompleted { .. } => "stage_completed",
            Self::RetryScheduled { .. } => "retry_scheduled",
            Self::JobFinished { .. } => "job_finished",
        }
    }
}

/// Sink for telemetry events.
///
/// Implementations must be thread-safe and fast; events are emitted inline
/// from worker loops.
pub trait TelemetrySink: Send + Sync {
    /// Called for each event.
    fn emit(&self, event: TelemetryEvent);
}

/// No-op sink for when telemetry is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTelemetrySink;

impl TelemetrySink for NullTelemetrySink {
    fn emit(&self, _event: TelemetryEvent) {
        // Intentionally empty
    }
}

/// Sink that logs events through the `tracing` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetrySink;

impl TelemetrySink for TracingTelemetrySink {
    fn emit(&self, event: TelemetryEvent) {
        match &event {
            TelemetryEvent::JobSubmitted { job_id } => {
                tracing::debug!(job_id = %job_id, "Job submitted");
            }
            TelemetryEvent::AttemptStarted { job_id, attempt } => {
                tracing::debug!(job_id = %job_id, attempt = attempt, "Attempt started");
            }
            TelemetryEvent::StageStarted { job_id, stage } => {
                tracing::debug!(job_id = %job_id, stage = %stage, "Stage started");
            }
            TelemetryEvent::StageCompleted {
                job_id,
                stage,
                duration,
            } => {
                tracing::debug!(
                    job_id = %job_id,
                    stage = %stage,
                    duration_ms = duration.as_millis() as u64,
                    "Stage completed"
                );
            }
            TelemetryEvent::RetryScheduled {
                job_id,
                next_attempt,
                delay,
            } => {
                tracing::warn!(
                    job_id = %job_id,
                    next_attempt = next_attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Retry scheduled"
                );
            }
            TelemetryEvent::JobFinished {
                job_id,
                status,
                attempt,
            } => {
                tracing::debug!(
                    job_id = %job_id,
                    status = %status,
                    attempt = attempt,
                    "Job finished"
                );
            }
        }
    }
}
