//! TileForge CLI - command-line interface
//!
//! This binary provides a command-line interface to the TileForge library:
//! submit conversions and watch them run, list recorded jobs, and manage the
//! configuration file.

mod commands;
mod error;

use clap::{Parser, Subcommand};
use commands::config::ConfigCommand;
use commands::convert::ConvertArgs;
use commands::jobs::JobsArgs;
use error::CliError;
use std::path::PathBuf;
use tileforge::config::ConfigFile;
use tileforge::logging::init_logging;

#[derive(Parser)]
#[command(name = "tileforge", version = tileforge::VERSION)]
#[command(about = "Convert OSM extracts to PMTiles archives", long_about = None)]
struct Cli {
    /// Path to an alternate config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Submit an extract and watch the conversion to completion
    Convert(ConvertArgs),
    /// List recorded jobs
    Jobs(JobsArgs),
    /// Inspect or initialize the configuration file
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => e.exit(),
    };

    let result = match cli.command {
        Command::Convert(args) => {
            // The guard must stay alive for the duration of the conversion.
            match init_logging(&config.logging.directory, &config.logging.file) {
                Ok(_guard) => commands::convert::run(args, config).await,
                Err(e) => Err(CliError::LoggingInit(e.to_string())),
            }
        }
        Command::Jobs(args) => commands::jobs::run(args, config),
        Command::Config(command) => commands::config::run(command),
    };

    if let Err(e) = result {
        e.exit();
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<ConfigFile, CliError> {
    let result = match path {
        Some(path) => ConfigFile::load_from(path),
        None => ConfigFile::load(),
    };
    result.map_err(|e| CliError::Config(e.to_string()))
}
