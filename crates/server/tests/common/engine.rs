//! Controllable fake separation engine.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;
use stemwell_core::StemKind;
use stemwell_engine::{EngineError, EngineResult, ProgressFn, SeparationEngine};

/// A fake engine that writes stub stem files.
///
/// The gate lets a test hold the engine mid-run: while closed, `separate`
/// blocks after its first progress report until `open_gate` is called.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct FakeEngine {
    calls: AtomicUsize,
    gate: Mutex<bool>,
    gate_cv: Condvar,
    fail_with: Mutex<Option<String>>,
}

#[allow(dead_code)]
impl FakeEngine {
    /// Create an engine that completes immediately.
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            gate: Mutex::new(true),
            gate_cv: Condvar::new(),
            fail_with: Mutex::new(None),
        }
    }

    /// How many times `separate` has been invoked.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Close the gate so the next run blocks mid-separation.
    pub fn hold(&self) {
        *self.gate.lock().unwrap() = false;
    }

    /// Open the gate, releasing any held run.
    pub fn open_gate(&self) {
        let mut open = self.gate.lock().unwrap();
        *open = true;
        self.gate_cv.notify_all();
    }

    /// Make subsequent runs fail with the given reason.
    pub fn fail_with(&self, reason: &str) {
        *self.fail_with.lock().unwrap() = Some(reason.to_string());
    }

    fn wait_for_gate(&self) {
        let mut open = self.gate.lock().unwrap();
        while !*open {
            let (guard, timeout) = self
                .gate_cv
                .wait_timeout(open, Duration::from_secs(10))
                .unwrap();
            open = guard;
            assert!(!timeout.timed_out(), "engine gate never opened");
        }
    }
}

impl SeparationEngine for FakeEngine {
    fn separate(&self, _input: &Path, out_dir: &Path, progress: ProgressFn<'_>) -> EngineResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        progress(20.0, "Running stem separation...");

        self.wait_for_gate();

        if let Some(reason) = self.fail_with.lock().unwrap().clone() {
            return Err(EngineError::Separation(reason));
        }

        for kind in StemKind::ALL {
            std::fs::write(out_dir.join(kind.file_name()), b"RIFF stub stem data")?;
        }
        progress(80.0, "Saving stems...");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}
