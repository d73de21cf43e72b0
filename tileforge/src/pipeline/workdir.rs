//! Job-scoped working directories.
//!
//! Each attempt gets `<temp_root>/<job_id>` as scratch space, exclusive to
//! the executing worker. The pipeline removes it on every exit path —
//! success, failure, and cancellation — so partial stage outputs never leak.

use crate::job::JobId;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A job's scratch directory under the configured temp root.
#[derive(Debug)]
pub struct Workdir {
    path: PathBuf,
}

impl Workdir {
    /// Creates (or re-creates) the directory for a job.
    ///
    /// A leftover directory from a previous attempt is removed first so a
    /// retry never sees stale partial outputs.
    pub async fn create(temp_root: &Path, job_id: &JobId) -> io::Result<Self> {
        let path = temp_root.join(job_id.as_str());
        if tokio::fs::metadata(&path).await.is_ok() {
            debug!(job_id = %job_id, "Removing leftover working directory from prior attempt");
            tokio::fs::remove_dir_all(&path).await?;
        }
        tokio::fs::create_dir_all(&path).await?;
        Ok(Self { path })
    }

    /// The directory path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the directory and everything in it.
    ///
    /// Failures are logged rather than propagated: cleanup must not mask the
    /// attempt's real outcome.
    pub async fn remove(self) {
        if let Err(e) = tokio::fs::remove_dir_all(&self.path).await {
            warn!(path = %self.path.display(), error = %e, "Failed to remove working directory");
        } else {
            debug!(path = %self.path.display(), "Removed working directory");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_remove() {
        let root = tempfile::TempDir::new().unwrap();
        let workdir = Workdir::create(root.path(), &JobId::new("w1")).await.unwrap();

        let path = workdir.path().to_path_buf();
        assert!(path.exists());
        assert!(path.ends_with("w1"));

        workdir.remove().await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_create_clears_stale_contents() {
        let root = tempfile::TempDir::new().unwrap();
        let stale = root.path().join("w2");
        std::fs::create_dir_all(&stale).unwrap();
        std::fs::write(stale.join("tiles.mbtiles"), b"partial").unwrap();

        let workdir = Workdir::create(root.path(), &JobId::new("w2")).await.unwrap();
        assert!(!workdir.path().join("tiles.mbtiles").exists());
        workdir.remove().await;
    }

    #[tokio::test]
    async fn test_remove_tolerates_missing_directory() {
        let root = tempfile::TempDir::new().unwrap();
        let workdir = Workdir::create(root.path(), &JobId::new("w3")).await.unwrap();
        std::fs::remove_dir_all(workdir.path()).unwrap();
        // Must not panic.
        workdir.remove().await;
    }
}
