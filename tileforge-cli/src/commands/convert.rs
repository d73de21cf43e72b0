//! `tileforge convert` - submit an extract and watch it to completion.

use crate::error::CliError;
use clap::Args;
use std::path::PathBuf;
use std::time::Duration;
use tileforge::config::ConfigFile;
use tileforge::job::{ConvertOptions, JobId, JobStatus, Simplification};
use tileforge::service::{ConversionService, StatusReport};

/// Poll interval for status updates while a conversion runs.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Args)]
pub struct ConvertArgs {
    /// Path to the OSM extract (.pbf or .osm)
    pub source: PathBuf,

    /// Minimum zoom level to tile
    #[arg(long, default_value_t = 0)]
    pub min_zoom: u8,

    /// Maximum zoom level to tile
    #[arg(long, default_value_t = 14)]
    pub max_zoom: u8,

    /// Layer to extract (repeat for multiple; defaults to points, lines,
    /// multilinestrings, multipolygons)
    #[arg(long = "layer")]
    pub layers: Vec<String>,

    /// Feature-thinning mode: drop-densest, coalesce, or none
    #[arg(long, default_value = "drop-densest")]
    pub simplification: String,
}

pub async fn run(args: ConvertArgs, config: ConfigFile) -> Result<(), CliError> {
    let simplification: Simplification = args
        .simplification
        .parse()
        .map_err(CliError::Config)?;

    let mut options = ConvertOptions {
        min_zoom: args.min_zoom,
        max_zoom: args.max_zoom,
        simplification,
        ..Default::default()
    };
    if !args.layers.is_empty() {
        options.layers = args.layers.clone();
    }

    let service = ConversionService::start(&config).map_err(CliError::ServiceStart)?;

    let job_id = service
        .submit(&args.source, options)
        .await
        .map_err(CliError::Submit)?;
    println!("Submitted job {}", job_id);

    let report = watch(&service, &job_id).await?;
    let outcome = conclude(report);

    service.shutdown().await;
    outcome
}

/// Polls the job until it reaches a terminal status, printing progress
/// changes. Ctrl-C requests cancellation and keeps waiting for the terminal
/// state.
async fn watch(service: &ConversionService, job_id: &JobId) -> Result<StatusReport, CliError> {
    let mut last_line = String::new();
    let mut interrupted = false;

    loop {
        let report = service.status(job_id).map_err(CliError::Lookup)?;
        if report.status.is_terminal() {
            return Ok(report);
        }

        let stage = report
            .current_stage
            .map(|s| s.name())
            .unwrap_or("queued");
        let line = format!("  {} {:>3}%  [{}]", report.status, report.progress, stage);
        if line != last_line {
            println!("{}", line);
            last_line = line;
        }

        if interrupted {
            tokio::time::sleep(POLL_INTERVAL).await;
            continue;
        }

        tokio::select! {
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
            _ = tokio::signal::ctrl_c() => {
                println!("Interrupt received, cancelling job {}", job_id);
                service.cancel(job_id).await;
                interrupted = true;
            }
        }
    }
}

fn conclude(report: StatusReport) -> Result<(), CliError> {
    match report.status {
        JobStatus::Completed => {
            let result = report.result.ok_or_else(|| CliError::ConversionFailed {
                stage: "finalize".to_string(),
                message: "completed without a result artifact".to_string(),
            })?;
            println!(
                "Done: {} ({} bytes)",
                result.path.display(),
                result.size_bytes
            );
            Ok(())
        }
        JobStatus::Cancelled => Err(CliError::Cancelled),
        JobStatus::Failed => Err(CliError::ConversionFailed {
            stage: report
                .failed_stage
                .map(|s| s.name().to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            message: report
                .error_message
                .unwrap_or_else(|| "no error recorded".to_string()),
        }),
        other => Err(CliError::ConversionFailed {
            stage: "unknown".to_string(),
            message: format!("unexpected terminal status {}", other),
        }),
    }
}
