//! Persisted resume sessions.

use crate::error::ClientResult;
use std::path::PathBuf;
use stemwell_core::{JobId, RESUME_TTL_MS, ResumeRecord};
use tokio::fs;
use tracing::debug;

/// Stores the most recent job as a resume record on disk.
///
/// A record is only honored within the resume TTL; reading an expired
/// record clears it so a stale job is never reattached.
#[derive(Clone, Debug)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Record a job for later resumption.
    pub async fn save(&self, job_id: JobId) -> ClientResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let record = ResumeRecord::new(job_id);
        let raw = serde_json::to_vec(&record)?;
        fs::write(&self.path, raw).await?;
        debug!(%job_id, path = %self.path.display(), "resume record saved");
        Ok(())
    }

    /// Return the saved job if the record is still fresh.
    ///
    /// Expired or unreadable records are cleared and report nothing.
    pub async fn resume(&self) -> ClientResult<Option<JobId>> {
        let raw = match fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let record: ResumeRecord = match serde_json::from_slice(&raw) {
            Ok(record) => record,
            Err(e) => {
                debug!(error = %e, "clearing unreadable resume record");
                self.clear().await?;
                return Ok(None);
            }
        };

        if !record.is_fresh(RESUME_TTL_MS) {
            debug!(job_id = %record.job_id, age_ms = record.age_ms(), "resume record expired");
            self.clear().await?;
            return Ok(None);
        }

        Ok(Some(record.job_id))
    }

    /// Remove the record. Called on terminal success, terminal error, or
    /// TTL expiry.
    pub async fn clear(&self) -> ClientResult<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
