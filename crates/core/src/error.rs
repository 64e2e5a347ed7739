//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid fingerprint: {0}")]
    InvalidFingerprint(String),

    #[error("invalid stem kind: {0}")]
    InvalidStemKind(String),

    #[error("incomplete stem set: missing {missing}")]
    IncompleteStemSet { missing: String },

    #[error("invalid job ID: {0}")]
    InvalidJobId(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
