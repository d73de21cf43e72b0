//! In-memory job store with optional JSON snapshot persistence.
//!
//! Records live in a concurrent map. When a snapshot path is configured,
//! every mutation rewrites the snapshot atomically (temp file + rename) so
//! records survive a process restart; the snapshot is loaded back at
//! construction time.

use super::query::{ListPage, ListQuery};
use super::{JobStore, StoreError};
use crate::job::{JobDescriptor, JobId, JobRecord, JobStatus, RecordPatch};
use dashmap::DashMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

/// Concurrent in-memory record table, optionally snapshotted to disk.
pub struct MemoryJobStore {
    records: DashMap<JobId, JobRecord>,
    snapshot: Option<PathBuf>,
    /// Serializes snapshot writes so concurrent mutations can't interleave
    /// partial files.
    persist_lock: Mutex<()>,
}

impl MemoryJobStore {
    /// Creates a purely in-memory store.
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            snapshot: None,
            persist_lock: Mutex::new(()),
        }
    }

    /// Creates a store backed by a JSON snapshot file.
    ///
    /// Existing records in the snapshot are loaded; a missing file is not an
    /// error.
    pub fn with_snapshot(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let store = Self {
            records: DashMap::new(),
            snapshot: Some(path.clone()),
            persist_lock: Mutex::new(()),
        };

        if path.exists() {
            let data = std::fs::read_to_string(&path)
                .map_err(|e| StoreError::Persist(format!("read {}: {}", path.display(), e)))?;
            let records: Vec<JobRecord> = serde_json::from_str(&data)
                .map_err(|e| StoreError::Persist(format!("parse {}: {}", path.display(), e)))?;
            let count = records.len();
            for record in records {
                store.records.insert(record.job_id.clone(), record);
            }
            info!(count, path = %path.display(), "Loaded job records from snapshot");
        }

        Ok(store)
    }

    /// Rewrites the snapshot file, if one is configured.
    fn persist(&self) -> Result<(), StoreError> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };

        let _guard = self
            .persist_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut records: Vec<JobRecord> = self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        let json = serde_json::to_string_pretty(&records)
            .map_err(|e| StoreError::Persist(e.to_string()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Persist(format!("create {}: {}", parent.display(), e)))?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .map_err(|e| StoreError::Persist(format!("write {}: {}", tmp.display(), e)))?;
        std::fs::rename(&tmp, path)
            .map_err(|e| StoreError::Persist(format!("rename {}: {}", path.display(), e)))?;

        Ok(())
    }

    /// Path of the configured snapshot file, if any.
    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot.as_deref()
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStore for MemoryJobStore {
    fn create(&self, descriptor: &JobDescriptor) -> Result<(), StoreError> {
        match self.records.entry(descriptor.job_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(StoreError::DuplicateId(descriptor.job_id.clone()));
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(JobRecord::new(descriptor));
            }
        }
        self.persist()
    }

    fn update(
        &self,
        job_id: &JobId,
        attempt: u32,
        patch: RecordPatch,
    ) -> Result<JobRecord, StoreError> {
        let updated = {
            let mut entry = self
                .records
                .get_mut(job_id)
                .ok_or_else(|| StoreError::NotFound(job_id.clone()))?;
            let record = entry.value_mut();

            if attempt < record.attempt || attempt > record.attempt + 1 {
                debug!(
                    job_id = %job_id,
                    given = attempt,
                    current = record.attempt,
                    "Rejecting update from mismatched attempt"
                );
                return Err(StoreError::Stale {
                    job_id: job_id.clone(),
                    given: attempt,
                    current: record.attempt,
                });
            }

            if attempt == record.attempt + 1 {
                // A fresh attempt begins: progress and failure state reset.
                record.attempt = attempt;
                record.progress = 0;
                record.current_stage = None;
                record.error_message = None;
                record.failed_stage = None;
                record.finished_at = None;
                record.result = None;
            }

            if let Some(next) = patch.status {
                if next != record.status && !record.status.can_transition_to(next) {
                    return Err(StoreError::InvalidTransition {
                        job_id: job_id.clone(),
                        from: record.status,
                        to: next,
                    });
                }
                record.status = next;
            }
            if let Some(stage) = patch.current_stage {
                record.current_stage = Some(stage);
            }
            if let Some(progress) = patch.progress {
                // Monotonic within an attempt.
                record.progress = record.progress.max(progress.min(100));
            }
            if let Some(started_at) = patch.started_at {
                record.started_at = Some(started_at);
            }
            if let Some(finished_at) = patch.finished_at {
                record.finished_at = Some(finished_at);
            }
            if let Some(message) = patch.error_message {
                record.error_message = Some(message);
            }
            if let Some(stage) = patch.failed_stage {
                record.failed_stage = Some(stage);
            }
            if let Some(result) = patch.result {
                record.result = Some(result);
            }

            record.clone()
        };

        self.persist()?;
        Ok(updated)
    }

    fn get(&self, job_id: &JobId) -> Result<JobRecord, StoreError> {
        self.records
            .get(job_id)
            .map(|r| r.value().clone())
            .ok_or_else(|| StoreError::NotFound(job_id.clone()))
    }

    fn list(&self, query: &ListQuery) -> ListPage {
        let mut matches: Vec<JobRecord> = self
            .records
            .iter()
            .filter(|r| query.status.is_none_or(|s| r.value().status == s))
            .map(|r| r.value().clone())
            .collect();

        matches.sort_by(|a, b| query.compare(a, b));

        let total_count = matches.len();
        let start = (query.page - 1).saturating_mul(query.page_size);
        let records = matches
            .into_iter()
            .skip(start)
            .take(query.page_size)
            .collect();

        ListPage {
            records,
            total_count,
        }
    }

    fn remove(&self, job_id: &JobId) -> Result<(), StoreError> {
        {
            let record = self
                .records
                .get(job_id)
                .ok_or_else(|| StoreError::NotFound(job_id.clone()))?;
            if record.status == JobStatus::Running {
                return Err(StoreError::RemoveActive(job_id.clone()));
            }
        }
        self.records.remove(job_id);
        self.persist()
    }

    fn status_counts(&self) -> HashMap<JobStatus, usize> {
        let mut counts = HashMap::new();
        for record in self.records.iter() {
            *counts.entry(record.value().status).or_insert(0) += 1;
        }
        counts
    }
}
