//! Store error types.

use stemwell_core::StemKind;
use thiserror::Error;

/// Artifact store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("staging for {fingerprint} is missing {stem}")]
    MissingArtifact {
        fingerprint: String,
        stem: StemKind,
    },

    #[error("staging for {fingerprint} has empty {stem}")]
    EmptyArtifact {
        fingerprint: String,
        stem: StemKind,
    },

    #[error("store root is not a directory: {0}")]
    InvalidRoot(String),
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
