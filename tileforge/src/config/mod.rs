//! Configuration: INI file loading, settings structs, defaults.

mod defaults;
mod file;
mod parser;
mod settings;
mod writer;

pub use defaults::{
    default_data_dir, default_worker_count, DEFAULT_LOG_FILE, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_RETRY_BASE_DELAY_MS, DEFAULT_RETRY_MAX_DELAY_MS, DEFAULT_SNAPSHOT_FILE,
    DEFAULT_STAGE_TIMEOUT_SECS,
};
pub use file::{config_directory, config_file_path, ConfigFileError};
pub use settings::{
    ConfigFile, LoggingSettings, PathsSettings, QueueSettings, ToolsSettings, WorkerSettings,
};
