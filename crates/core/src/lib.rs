//! Core domain types and shared logic for Stemwell.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Content fingerprints used as cache and lock keys
//! - Stem kinds and the complete artifact set
//! - Job identifiers and lifecycle states
//! - Progress channel wire messages
//! - Client-persisted resume records

pub mod config;
pub mod error;
pub mod fingerprint;
pub mod job;
pub mod message;
pub mod resume;
pub mod stem;

pub use error::{Error, Result};
pub use fingerprint::{Fingerprint, FingerprintHasher};
pub use job::{JobId, JobState, JobStatusResponse, SubmitResponse};
pub use message::Message;
pub use resume::{ResumeRecord, RESUME_TTL_MS};
pub use stem::{StemKind, StemSet};

/// Maximum accepted upload size: 100 MiB.
pub const MAX_UPLOAD_SIZE: u64 = 100 * 1024 * 1024;

/// Content types accepted at the submission boundary.
pub const ACCEPTED_CONTENT_TYPES: &[&str] = &[
    "audio/mpeg",
    "audio/mp3",
    "audio/wav",
    "audio/x-wav",
    "audio/mp4",
    "audio/m4a",
];

/// Check whether a content type is accepted for upload.
pub fn is_accepted_content_type(content_type: &str) -> bool {
    // Strip any parameters (e.g. "audio/wav; charset=binary")
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim();
    ACCEPTED_CONTENT_TYPES
        .iter()
        .any(|t| t.eq_ignore_ascii_case(essence))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepted_content_types() {
        assert!(is_accepted_content_type("audio/wav"));
        assert!(is_accepted_content_type("audio/mpeg"));
        assert!(is_accepted_content_type("AUDIO/MP3"));
        assert!(is_accepted_content_type("audio/wav; charset=binary"));
        assert!(!is_accepted_content_type("video/mp4"));
        assert!(!is_accepted_content_type("text/plain"));
    }
}
