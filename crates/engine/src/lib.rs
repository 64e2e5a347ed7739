//! Separation engine boundary.
//!
//! The engine is an external collaborator: a blocking, non-preemptible call
//! that turns one input file into the four stem WAVs. The coordinator runs
//! it on a blocking worker and treats it as opaque. There is no mid-call
//! cancellation hook, so cancellation is decided at the call boundaries.

pub mod command;
pub mod error;

pub use command::CommandEngine;
pub use error::{EngineError, EngineResult};

use std::path::Path;

/// Progress callback: `(percent, status)`.
pub type ProgressFn<'a> = &'a (dyn Fn(f32, &str) + Send + Sync);

/// A stem separation engine.
///
/// `separate` blocks until the run finishes and writes the complete stem
/// file set into `out_dir`. Implementations must be callable from a
/// blocking worker thread.
pub trait SeparationEngine: Send + Sync + 'static {
    /// Separate `input` into stem files under `out_dir`.
    fn separate(&self, input: &Path, out_dir: &Path, progress: ProgressFn<'_>)
        -> EngineResult<()>;

    /// Short identifier for logging.
    fn name(&self) -> &'static str;
}
