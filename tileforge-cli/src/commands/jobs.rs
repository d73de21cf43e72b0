//! `tileforge jobs` - list recorded jobs from the snapshot store.

use crate::error::CliError;
use clap::Args;
use tileforge::config::ConfigFile;
use tileforge::job::JobStatus;
use tileforge::store::{JobStore, ListQuery, MemoryJobStore, SortBy, SortOrder};

#[derive(Debug, Args)]
pub struct JobsArgs {
    /// Filter by status: pending, running, completed, failed, cancelled
    #[arg(long)]
    pub status: Option<String>,

    /// Page number (1-based)
    #[arg(long, default_value_t = 1)]
    pub page: usize,

    /// Records per page
    #[arg(long, default_value_t = 20)]
    pub page_size: usize,

    /// Sort field: created_at, finished_at, status, progress
    #[arg(long, default_value = "created_at")]
    pub sort: String,

    /// Sort order: asc or desc
    #[arg(long, default_value = "desc")]
    pub order: String,
}

pub fn run(args: JobsArgs, config: ConfigFile) -> Result<(), CliError> {
    let Some(snapshot) = &config.paths.snapshot else {
        return Err(CliError::Config(
            "job-record persistence is disabled (paths.snapshot = off); \
             there is no history to list"
                .to_string(),
        ));
    };

    let store = MemoryJobStore::with_snapshot(snapshot)
        .map_err(|e| CliError::Config(e.to_string()))?;

    let mut query = ListQuery::default().page(args.page).page_size(args.page_size);
    if let Some(status) = &args.status {
        let status: JobStatus = status.parse().map_err(CliError::Config)?;
        query = query.with_status(status);
    }
    let sort_by: SortBy = args.sort.parse().map_err(CliError::Config)?;
    let order: SortOrder = args.order.parse().map_err(CliError::Config)?;
    query = query.sort(sort_by, order);

    let page = store.list(&query);
    if page.records.is_empty() {
        println!("No jobs found.");
        return Ok(());
    }

    println!(
        "{:<38} {:<10} {:>5}  {:<9} {:>3}  {}",
        "JOB", "STATUS", "PROG", "STAGE", "TRY", "SUBMITTED"
    );
    for record in &page.records {
        println!(
            "{:<38} {:<10} {:>4}%  {:<9} {:>3}  {}",
            record.job_id,
            record.status.to_string(),
            record.progress,
            record
                .current_stage
                .map(|s| s.name())
                .unwrap_or("-"),
            record.attempt,
            record.created_at.format("%Y-%m-%d %H:%M:%S"),
        );
        if let Some(error) = &record.error_message {
            println!("{:<38} error: {}", "", error);
        }
    }
    println!(
        "Page {} ({} of {} jobs)",
        args.page,
        page.records.len(),
        page.total_count
    );

    Ok(())
}
