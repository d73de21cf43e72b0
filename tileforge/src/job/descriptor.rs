//! Immutable job descriptors.

use super::id::JobId;
use super::options::ConvertOptions;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Immutable description of a submitted conversion job.
///
/// Created once at submission and never mutated. The queue owns the
/// descriptor until a worker dequeues it; from then on the executing worker
/// owns it for the duration of the attempt.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobDescriptor {
    /// Unique job identifier, stable across retries.
    pub job_id: JobId,

    /// Path to the source OSM extract.
    pub source: PathBuf,

    /// Validated conversion options.
    pub options: ConvertOptions,

    /// When the job was submitted.
    pub created_at: DateTime<Utc>,
}

impl JobDescriptor {
    /// Creates a descriptor stamped with the current time.
    pub fn new(job_id: JobId, source: PathBuf, options: ConvertOptions) -> Self {
        Self {
            job_id,
            source,
            options,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_carries_submission_data() {
        let descriptor = JobDescriptor::new(
            JobId::new("d1"),
            PathBuf::from("/data/region.osm.pbf"),
            ConvertOptions::default(),
        );

        assert_eq!(descriptor.job_id.as_str(), "d1");
        assert_eq!(descriptor.source, PathBuf::from("/data/region.osm.pbf"));
        assert!(descriptor.created_at <= Utc::now());
    }
}
