//! INI serialization logic for converting `ConfigFile` → INI string.
//!
//! Produces the commented INI representation written to `config.ini`.

use super::settings::ConfigFile;
use std::path::Path;

/// Convert a `ConfigFile` to a commented INI string for saving.
pub(super) fn to_config_string(config: &ConfigFile) -> String {
    let snapshot = config
        .paths
        .snapshot
        .as_ref()
        .map(|p| path_to_string(p))
        .unwrap_or_else(|| "off".to_string());

    format!(
        r#"[paths]
; Base directory for all TileForge data (default: ~/.tileforge)
data_dir = {}
; Root for job-scoped working directories (default: <data_dir>/temp)
temp_dir = {}
; Directory completed tile archives are published into (default: <data_dir>/tiles)
results_dir = {}
; Job-record snapshot file, or 'off' to keep records in memory only
snapshot = {}

[queue]
; Maximum attempts per job, including the initial run (default: 3)
max_attempts = {}
; Delay before the first retry, in milliseconds (default: 2000)
; Later retries double the delay: 2s, 4s, 8s, ...
retry_base_delay_ms = {}
; Ceiling on retry delays, in milliseconds (default: 60000)
retry_max_delay_ms = {}
; Add random jitter to retry delays so failures don't retry in lockstep
retry_jitter = {}

[workers]
; Concurrent conversion workers. Tiling is CPU- and memory-heavy; keep this
; well below the core count (default: cores / 4)
count = {}
; Wall-clock ceiling per stage in seconds, guarding against hung tools
; (default: 3600)
stage_timeout_secs = {}

[tools]
; External tool locations; bare names resolve through PATH
ogr2ogr = {}
tippecanoe = {}
pmtiles = {}

[logging]
; Directory for log files (default: <data_dir>/logs)
directory = {}
; Log file name
file = {}
"#,
        path_to_string(&config.paths.data_dir),
        path_to_string(&config.paths.temp_dir),
        path_to_string(&config.paths.results_dir),
        snapshot,
        config.queue.max_attempts,
        config.queue.retry_base_delay_ms,
        config.queue.retry_max_delay_ms,
        config.queue.retry_jitter,
        config.workers.count,
        config.workers.stage_timeout_secs,
        path_to_string(&config.tools.ogr2ogr),
        path_to_string(&config.tools.tippecanoe),
        path_to_string(&config.tools.pmtiles),
        path_to_string(&config.logging.directory),
        config.logging.file,
    )
}

fn path_to_string(path: &Path) -> String {
    path.display().to_string()
}
