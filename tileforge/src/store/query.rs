//! List queries over job records: filtering, sorting, pagination.

use crate::job::{JobRecord, JobStatus};
use std::cmp::Ordering;
use std::str::FromStr;

/// Default page size for list queries.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Largest page size a caller may request.
pub const MAX_PAGE_SIZE: usize = 100;

/// Field job listings can be sorted by.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortBy {
    /// Submission time.
    #[default]
    CreatedAt,

    /// Terminal-state time (jobs without one sort last).
    FinishedAt,

    /// Lifecycle status.
    Status,

    /// Overall progress.
    Progress,
}

impl FromStr for SortBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "created_at" | "created" => Ok(Self::CreatedAt),
            "finished_at" | "finished" => Ok(Self::FinishedAt),
            "status" => Ok(Self::Status),
            "progress" => Ok(Self::Progress),
            other => Err(format!(
                "unknown sort field '{}' (expected created_at, finished_at, status, or progress)",
                other
            )),
        }
    }
}

/// Sort direction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortOrder {
    /// Newest/highest first.
    #[default]
    Desc,

    /// Oldest/lowest first.
    Asc,
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "asc" | "ascending" => Ok(Self::Asc),
            "desc" | "descending" => Ok(Self::Desc),
            other => Err(format!("unknown sort order '{}' (expected asc or desc)", other)),
        }
    }
}

/// Parameters for listing job records.
#[derive(Clone, Debug)]
pub struct ListQuery {
    /// Restrict to records with this status.
    pub status: Option<JobStatus>,

    /// 1-based page number.
    pub page: usize,

    /// Records per page, clamped to [1, MAX_PAGE_SIZE].
    pub page_size: usize,

    /// Sort field.
    pub sort_by: SortBy,

    /// Sort direction.
    pub order: SortOrder,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            status: None,
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            sort_by: SortBy::default(),
            order: SortOrder::default(),
        }
    }
}

impl ListQuery {
    /// Restricts results to the given status.
    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Selects a page (1-based; 0 is treated as 1).
    pub fn page(mut self, page: usize) -> Self {
        self.page = page.max(1);
        self
    }

    /// Sets the page size (clamped to [1, MAX_PAGE_SIZE]).
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        self
    }

    /// Sets the sort field and direction.
    pub fn sort(mut self, sort_by: SortBy, order: SortOrder) -> Self {
        self.sort_by = sort_by;
        self.order = order;
        self
    }

    /// Comparison function for the configured sort.
    pub(crate) fn compare(&self, a: &JobRecord, b: &JobRecord) -> Ordering {
        let ordering = match self.sort_by {
            SortBy::CreatedAt => a.created_at.cmp(&b.created_at),
            // None (still running) sorts after every concrete timestamp.
            SortBy::FinishedAt => match (a.finished_at, b.finished_at) {
                (Some(a), Some(b)) => a.cmp(&b),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            },
            SortBy::Status => (a.status as u8).cmp(&(b.status as u8)),
            SortBy::Progress => a.progress.cmp(&b.progress),
        };
        match self.order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    }
}

/// One page of job records plus the total match count.
#[derive(Clone, Debug)]
pub struct ListPage {
    /// Records on this page, in sort order.
    pub records: Vec<JobRecord>,

    /// Total records matching the filter across all pages.
    pub total_count: usize,
}
