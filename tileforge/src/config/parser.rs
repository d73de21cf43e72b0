//! INI parsing logic for converting `Ini` → `ConfigFile`.
//!
//! Starts from `ConfigFile::default()` and overlays any values found in the
//! INI. This is the single place where INI key names map to struct fields.

use super::defaults::DEFAULT_SNAPSHOT_FILE;
use super::file::ConfigFileError;
use super::settings::ConfigFile;
use ini::Ini;
use std::path::PathBuf;

/// Parse an `Ini` object into a `ConfigFile`.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [paths] section. Derived paths follow an overridden data_dir unless
    // set explicitly themselves.
    if let Some(section) = ini.section(Some("paths")) {
        if let Some(v) = non_empty(section.get("data_dir")) {
            config.paths.data_dir = expand_tilde(v);
            config.paths.temp_dir = config.paths.data_dir.join("temp");
            config.paths.results_dir = config.paths.data_dir.join("tiles");
            config.paths.snapshot = Some(config.paths.data_dir.join(DEFAULT_SNAPSHOT_FILE));
        }
        if let Some(v) = non_empty(section.get("temp_dir")) {
            config.paths.temp_dir = expand_tilde(v);
        }
        if let Some(v) = non_empty(section.get("results_dir")) {
            config.paths.results_dir = expand_tilde(v);
        }
        if let Some(v) = section.get("snapshot") {
            let v = v.trim();
            config.paths.snapshot = match v.to_lowercase().as_str() {
                "" | "off" | "none" => None,
                _ => Some(expand_tilde(v)),
            };
        }
    }

    // [queue] section
    if let Some(section) = ini.section(Some("queue")) {
        if let Some(v) = section.get("max_attempts") {
            let parsed: u32 = parse_number(v, "queue", "max_attempts")?;
            if parsed == 0 {
                return Err(invalid("queue", "max_attempts", v, "must be at least 1"));
            }
            config.queue.max_attempts = parsed;
        }
        if let Some(v) = section.get("retry_base_delay_ms") {
            config.queue.retry_base_delay_ms = parse_number(v, "queue", "retry_base_delay_ms")?;
        }
        if let Some(v) = section.get("retry_max_delay_ms") {
            config.queue.retry_max_delay_ms = parse_number(v, "queue", "retry_max_delay_ms")?;
        }
        if let Some(v) = section.get("retry_jitter") {
            config.queue.retry_jitter = parse_bool(v, "queue", "retry_jitter")?;
        }
    }

    // [workers] section
    if let Some(section) = ini.section(Some("workers")) {
        if let Some(v) = section.get("count") {
            let parsed: usize = parse_number(v, "workers", "count")?;
            if parsed == 0 {
                return Err(invalid("workers", "count", v, "must be at least 1"));
            }
            config.workers.count = parsed;
        }
        if let Some(v) = section.get("stage_timeout_secs") {
            let parsed: u64 = parse_number(v, "workers", "stage_timeout_secs")?;
            if parsed == 0 {
                return Err(invalid(
                    "workers",
                    "stage_timeout_secs",
                    v,
                    "must be at least 1",
                ));
            }
            config.workers.stage_timeout_secs = parsed;
        }
    }

    // [tools] section
    if let Some(section) = ini.section(Some("tools")) {
        if let Some(v) = non_empty(section.get("ogr2ogr")) {
            config.tools.ogr2ogr = expand_tilde(v);
        }
        if let Some(v) = non_empty(section.get("tippecanoe")) {
            config.tools.tippecanoe = expand_tilde(v);
        }
        if let Some(v) = non_empty(section.get("pmtiles")) {
            config.tools.pmtiles = expand_tilde(v);
        }
    }

    // [logging] section
    if let Some(section) = ini.section(Some("logging")) {
        if let Some(v) = non_empty(section.get("directory")) {
            config.logging.directory = expand_tilde(v);
        }
        if let Some(v) = non_empty(section.get("file")) {
            config.logging.file = v.to_string();
        }
    }

    Ok(config)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_number<T: std::str::FromStr>(
    value: &str,
    section: &str,
    key: &str,
) -> Result<T, ConfigFileError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(section, key, value, "must be a positive integer"))
}

fn parse_bool(value: &str, section: &str, key: &str) -> Result<bool, ConfigFileError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(invalid(section, key, value, "must be true or false")),
    }
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Expands a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(content: &str) -> Result<ConfigFile, ConfigFileError> {
        let ini = Ini::load_from_str(content).unwrap();
        parse_ini(&ini)
    }

    #[test]
    fn test_empty_ini_yields_defaults() {
        let config = load("").unwrap();
        let default = ConfigFile::default();
        assert_eq!(config.queue.max_attempts, default.queue.max_attempts);
        assert_eq!(config.workers.count, default.workers.count);
    }

    #[test]
    fn test_data_dir_override_moves_derived_paths() {
        let config = load("[paths]\ndata_dir = /srv/tileforge\n").unwrap();
        assert_eq!(config.paths.data_dir, PathBuf::from("/srv/tileforge"));
        assert_eq!(config.paths.temp_dir, PathBuf::from("/srv/tileforge/temp"));
        assert_eq!(
            config.paths.results_dir,
            PathBuf::from("/srv/tileforge/tiles")
        );
        assert_eq!(
            config.paths.snapshot,
            Some(PathBuf::from("/srv/tileforge/jobs.json"))
        );
    }

    #[test]
    fn test_explicit_temp_dir_wins_over_derived() {
        let config = load("[paths]\ndata_dir = /srv/tf\ntemp_dir = /scratch\n").unwrap();
        assert_eq!(config.paths.temp_dir, PathBuf::from("/scratch"));
        assert_eq!(config.paths.results_dir, PathBuf::from("/srv/tf/tiles"));
    }

    #[test]
    fn test_snapshot_off_disables_persistence() {
        let config = load("[paths]\nsnapshot = off\n").unwrap();
        assert!(config.paths.snapshot.is_none());
    }

    #[test]
    fn test_queue_values_parsed() {
        let config = load(
            "[queue]\nmax_attempts = 5\nretry_base_delay_ms = 250\nretry_jitter = false\n",
        )
        .unwrap();
        assert_eq!(config.queue.max_attempts, 5);
        assert_eq!(config.queue.retry_base_delay_ms, 250);
        assert!(!config.queue.retry_jitter);
    }

    #[test]
    fn test_zero_max_attempts_rejected() {
        let result = load("[queue]\nmax_attempts = 0\n");
        assert!(matches!(
            result,
            Err(ConfigFileError::InvalidValue { section, key, .. })
                if section == "queue" && key == "max_attempts"
        ));
    }

    #[test]
    fn test_bad_number_rejected() {
        assert!(load("[workers]\ncount = lots\n").is_err());
    }

    #[test]
    fn test_tools_parsed() {
        let config = load("[tools]\ntippecanoe = /opt/tippecanoe/bin/tippecanoe\n").unwrap();
        assert_eq!(
            config.tools.tippecanoe,
            PathBuf::from("/opt/tippecanoe/bin/tippecanoe")
        );
        assert_eq!(config.tools.ogr2ogr, PathBuf::from("ogr2ogr"));
    }
}
