//! Per-job conversion pipeline.
//!
//! ```text
//! validate ──► extract ──► tile ──► package ──► finalize
//!   10%          30%        40%       15%          5%
//! ```
//!
//! One pipeline instance runs one attempt of one job inside a job-scoped
//! working directory. Stage boundaries are the cancellation checkpoints; a
//! request arriving mid-stage kills the running subprocess, so cancellation
//! latency is bounded by a single stage, not the whole job.

mod error;
mod runner;
mod workdir;

pub use error::{PipelineError, PipelineOutcome};
pub use runner::ConversionPipeline;
pub use workdir::Workdir;
