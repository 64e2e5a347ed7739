//! Subprocess-backed separation engine.

use crate::error::{EngineError, EngineResult};
use crate::{ProgressFn, SeparationEngine};
use std::path::Path;
use std::process::Command;
use stemwell_core::config::EngineConfig;
use stemwell_core::StemKind;
use tracing::{debug, info};

/// Runs a separator program as a child process.
///
/// Invoked as `<program> <args...> <input> <out_dir>`; the program is
/// expected to write `drums.wav`, `bass.wav`, `other.wav`, and `vocals.wav`
/// into the output directory and exit zero.
pub struct CommandEngine {
    program: String,
    args: Vec<String>,
}

impl CommandEngine {
    /// Create an engine from configuration.
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
        }
    }
}

impl SeparationEngine for CommandEngine {
    fn separate(
        &self,
        input: &Path,
        out_dir: &Path,
        progress: ProgressFn<'_>,
    ) -> EngineResult<()> {
        progress(20.0, "Running stem separation...");
        debug!(program = %self.program, input = %input.display(), "launching separator");

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(input)
            .arg(out_dir)
            .output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr.lines().last().unwrap_or("no output").trim();
            return Err(EngineError::Separation(format!(
                "separator exited with {}: {}",
                output.status, detail
            )));
        }

        progress(80.0, "Saving stems...");
        for kind in StemKind::ALL {
            if !out_dir.join(kind.file_name()).is_file() {
                return Err(EngineError::MissingOutput { stem: kind });
            }
        }

        info!(input = %input.display(), "separation finished");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "command"
    }
}
