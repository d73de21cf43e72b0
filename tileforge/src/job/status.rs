//! Job status state machine.
//!
//! Statuses move along a fixed state machine:
//!
//! ```text
//! pending ──► running ──► completed
//!    │           │──────► failed ──► pending   (retry, until attempts exhausted)
//!    │           └──────► cancelled
//!    └──────────────────► cancelled
//! ```
//!
//! `completed` and `cancelled` are always terminal. `failed` is terminal once
//! the retry budget is spent; until then the worker moves the job back to
//! `pending` when it schedules another attempt.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a conversion job.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Queued, waiting for a free worker (or for a retry delay to elapse).
    #[default]
    Pending,

    /// A worker is executing the job's pipeline.
    Running,

    /// All stages succeeded; the result artifact is available.
    Completed,

    /// The most recent attempt failed. Terminal once retries are exhausted.
    Failed,

    /// Cancelled before completion.
    Cancelled,
}

impl JobStatus {
    /// Returns true if no worker will touch this job again.
    ///
    /// `Failed` counts as terminal here: when a retry is scheduled the worker
    /// moves the record back to `Pending` before releasing the job.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns true if the job is still in flight or waiting to run.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }

    /// Returns true if `next` is a legal successor of `self`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Cancelled)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Cancelled)
                | (Self::Failed, Self::Pending)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!(
                "unknown status '{}' (expected pending, running, completed, failed, or cancelled)",
                other
            )),
        }
    }
}
