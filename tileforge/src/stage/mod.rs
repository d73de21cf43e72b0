//! Conversion stages: the static stage table, progress adapters, and the
//! subprocess stage runner.
//!
//! # Subprocess contract
//!
//! Each external tool receives its inputs and stage parameters as arguments,
//! runs with the job working directory as its current directory, writes its
//! declared output artifacts there, and exits 0 on success. Any other exit
//! code is a stage failure. Tools that report progress do so as discrete
//! output lines parsed by the stage's adapter in [`progress`].

mod progress;
mod runner;
mod spec;

pub use progress::parse_stage_progress;
pub use runner::{
    ProcessStageRunner, StageContext, StageOutcome, StageRunner, MAX_SOURCE_SIZE, MIN_SOURCE_SIZE,
    STDERR_TAIL_LINES,
};
pub use spec::{
    build_stage_sequence, StageKind, StageSpec, StageWork, ToolInvocation, ToolPaths,
    ARCHIVE_NAME, MBTILES_NAME, RESULT_EXTENSION,
};
