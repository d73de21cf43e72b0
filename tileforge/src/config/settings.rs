//! Settings structs for all configuration sections.
//!
//! Each struct represents one `[section]` of the INI config file. These are
//! pure data types; parsing lives in [`super::parser`], serialization in
//! [`super::writer`].

use super::defaults::*;
use crate::queue::BackoffPolicy;
use crate::stage::ToolPaths;
use std::path::PathBuf;
use std::time::Duration;

/// Complete application configuration loaded from config.ini.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    /// Data, temp, and results directories.
    pub paths: PathsSettings,
    /// Retry policy and admission limits.
    pub queue: QueueSettings,
    /// Worker pool sizing and stage timeouts.
    pub workers: WorkerSettings,
    /// External tool locations.
    pub tools: ToolsSettings,
    /// Log output location.
    pub logging: LoggingSettings,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            paths: PathsSettings::default(),
            queue: QueueSettings::default(),
            workers: WorkerSettings::default(),
            tools: ToolsSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

/// Filesystem layout.
#[derive(Debug, Clone)]
pub struct PathsSettings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Root for job-scoped working directories.
    pub temp_dir: PathBuf,
    /// Directory completed archives are published into.
    pub results_dir: PathBuf,
    /// Job-record snapshot file; `None` disables persistence.
    pub snapshot: Option<PathBuf>,
}

impl Default for PathsSettings {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            temp_dir: data_dir.join("temp"),
            results_dir: data_dir.join("tiles"),
            snapshot: Some(data_dir.join(DEFAULT_SNAPSHOT_FILE)),
            data_dir,
        }
    }
}

/// Queue and retry behavior.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// Maximum attempts per job, including the initial run.
    pub max_attempts: u32,
    /// Base delay in milliseconds before the first retry.
    pub retry_base_delay_ms: u64,
    /// Ceiling in milliseconds on retry delays.
    pub retry_max_delay_ms: u64,
    /// Whether retry delays get random jitter.
    pub retry_jitter: bool,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            retry_max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
            retry_jitter: true,
        }
    }
}

impl QueueSettings {
    /// The backoff policy these settings describe.
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            jitter: self.retry_jitter,
        }
    }
}

/// Worker pool sizing.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Number of concurrent conversion workers.
    pub count: usize,
    /// Per-stage wall-clock ceiling in seconds.
    pub stage_timeout_secs: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            stage_timeout_secs: DEFAULT_STAGE_TIMEOUT_SECS,
        }
    }
}

impl WorkerSettings {
    /// The stage timeout as a duration.
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }
}

/// External tool locations; bare names resolve through PATH.
#[derive(Debug, Clone)]
pub struct ToolsSettings {
    /// GDAL's `ogr2ogr`.
    pub ogr2ogr: PathBuf,
    /// `tippecanoe`.
    pub tippecanoe: PathBuf,
    /// `pmtiles`.
    pub pmtiles: PathBuf,
}

impl Default for ToolsSettings {
    fn default() -> Self {
        Self {
            ogr2ogr: PathBuf::from("ogr2ogr"),
            tippecanoe: PathBuf::from("tippecanoe"),
            pmtiles: PathBuf::from("pmtiles"),
        }
    }
}

impl ToolsSettings {
    /// The tool path table the stage builder consumes.
    pub fn tool_paths(&self) -> ToolPaths {
        ToolPaths {
            ogr2ogr: self.ogr2ogr.clone(),
            tippecanoe: self.tippecanoe.clone(),
            pmtiles: self.pmtiles.clone(),
        }
    }
}

/// Log output location.
#[derive(Debug, Clone)]
pub struct LoggingSettings {
    /// Directory for log files.
    pub directory: PathBuf,
    /// Log file name.
    pub file: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            directory: default_data_dir().join("logs"),
            file: DEFAULT_LOG_FILE.to_string(),
        }
    }
}
