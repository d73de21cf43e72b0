//! Job identifiers.
//!
//! Job IDs are strings that uniquely identify a job for its whole lifetime,
//! including across retry attempts. Callers may supply meaningful IDs;
//! system-generated IDs are random UUIDs so they stay unique across process
//! restarts once records are persisted.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a conversion job.
///
/// # Example
///
/// ```ignore
/// use tileforge::job::JobId;
///
/// // ID from meaningful data (e.g. an upload reference)
/// let id = JobId::new("upload-4711");
///
/// // System-generated unique ID
/// let id = JobId::generate();
/// ```
#[derive(Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Creates a job ID with the given string value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Creates a system-generated unique job ID (random UUID).
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the string value of this job ID.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JobId({})", self.0)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_new() {
        let id = JobId::new("test-job");
        assert_eq!(id.as_str(), "test-job");
    }

    #[test]
    fn test_job_id_generate_is_unique() {
        let id1 = JobId::generate();
        let id2 = JobId::generate();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_job_id_equality() {
        assert_eq!(JobId::new("a"), JobId::new("a"));
        assert_ne!(JobId::new("a"), JobId::new("b"));
    }

    #[test]
    fn test_job_id_display() {
        let id = JobId::new("my-job-123");
        assert_eq!(format!("{}", id), "my-job-123");
    }

    #[test]
    fn test_job_id_from_string() {
        let id: JobId = String::from("from-string").into();
        assert_eq!(id.as_str(), "from-string");
    }

    #[test]
    fn test_job_id_serde_transparent() {
        let id = JobId::new("j1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"j1\"");
        let back: JobId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
