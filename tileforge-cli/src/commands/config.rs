//! `tileforge config` - inspect and initialize the configuration file.

use crate::error::CliError;
use clap::Subcommand;
use tileforge::config::{config_file_path, ConfigFile};

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the resolved configuration
    Show,
    /// Write the default config file if it doesn't exist
    Init,
    /// Print the config file path
    Path,
}

pub fn run(command: ConfigCommand) -> Result<(), CliError> {
    match command {
        ConfigCommand::Show => {
            let path = config_file_path();
            let config = ConfigFile::load().map_err(|e| CliError::Config(e.to_string()))?;
            if path.exists() {
                println!("# {}", path.display());
            } else {
                println!("# {} (not present, showing defaults)", path.display());
            }
            println!();
            println!("data_dir            = {}", config.paths.data_dir.display());
            println!("temp_dir            = {}", config.paths.temp_dir.display());
            println!("results_dir         = {}", config.paths.results_dir.display());
            println!(
                "snapshot            = {}",
                config
                    .paths
                    .snapshot
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "off".to_string())
            );
            println!("max_attempts        = {}", config.queue.max_attempts);
            println!("retry_base_delay_ms = {}", config.queue.retry_base_delay_ms);
            println!("retry_max_delay_ms  = {}", config.queue.retry_max_delay_ms);
            println!("retry_jitter        = {}", config.queue.retry_jitter);
            println!("workers             = {}", config.workers.count);
            println!("stage_timeout_secs  = {}", config.workers.stage_timeout_secs);
            println!("ogr2ogr             = {}", config.tools.ogr2ogr.display());
            println!("tippecanoe          = {}", config.tools.tippecanoe.display());
            println!("pmtiles             = {}", config.tools.pmtiles.display());
            Ok(())
        }
        ConfigCommand::Init => {
            let path =
                ConfigFile::ensure_exists().map_err(|e| CliError::Config(e.to_string()))?;
            println!("Config file: {}", path.display());
            Ok(())
        }
        ConfigCommand::Path => {
            println!("{}", config_file_path().display());
            Ok(())
        }
    }
}
