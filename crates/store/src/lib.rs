//! Content-addressed artifact store for separated stems.
//!
//! This crate provides:
//! - Staging directories for in-progress separation output
//! - Atomic publish: an entry becomes visible under its final key only
//!   after every stem is fully written
//! - Completeness-checked, self-healing lookup
//! - A garbage collection sweep for orphaned staging and expired entries

pub mod error;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use store::{Staging, StemStore, SweepStats};
