//! Engine error types.

use stemwell_core::StemKind;
use thiserror::Error;

/// Separation engine errors.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to launch separator: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("stem separation failed: {0}")]
    Separation(String),

    #[error("separator produced no {stem} output")]
    MissingOutput { stem: StemKind },
}

/// Result type for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;
