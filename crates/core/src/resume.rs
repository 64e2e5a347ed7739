//! Client-persisted resume records.

use crate::job::JobId;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Default resume record TTL: 5 minutes.
pub const RESUME_TTL_MS: u64 = 300_000;

/// A locally persisted record allowing an interrupted client to reattach
/// to an in-flight job after reload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeRecord {
    pub job_id: JobId,
    /// Unix epoch milliseconds at save time.
    pub timestamp: u64,
}

impl ResumeRecord {
    /// Create a record stamped with the current time.
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            timestamp: now_epoch_ms(),
        }
    }

    /// Age of the record in milliseconds (zero if the clock went backwards).
    pub fn age_ms(&self) -> u64 {
        now_epoch_ms().saturating_sub(self.timestamp)
    }

    /// Whether the record is still within its TTL.
    pub fn is_fresh(&self, ttl_ms: u64) -> bool {
        self.age_ms() < ttl_ms
    }
}

/// Current time as Unix epoch milliseconds.
pub fn now_epoch_ms() -> u64 {
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
    u64::try_from(nanos / 1_000_000).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_record_within_ttl() {
        let record = ResumeRecord::new(JobId::new());
        assert!(record.is_fresh(RESUME_TTL_MS));
    }

    #[test]
    fn test_expired_record() {
        let record = ResumeRecord {
            job_id: JobId::new(),
            timestamp: now_epoch_ms().saturating_sub(RESUME_TTL_MS + 1),
        };
        assert!(!record.is_fresh(RESUME_TTL_MS));
    }

    #[test]
    fn test_record_roundtrip() {
        let record = ResumeRecord::new(JobId::new());
        let json = serde_json::to_string(&record).unwrap();
        let back: ResumeRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, back);
    }
}
