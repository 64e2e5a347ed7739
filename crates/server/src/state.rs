//! Application state shared across handlers.

use crate::coordinator::Coordinator;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use stemwell_core::config::AppConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Job coordinator.
    pub coordinator: Arc<Coordinator>,
    /// Spool directory for uploads awaiting separation.
    pub upload_dir: PathBuf,
}

impl AppState {
    /// Create a new application state.
    ///
    /// This performs configuration validation and logs warnings for potentially
    /// dangerous settings. Panics if configuration is invalid.
    ///
    /// # Panics
    ///
    /// Panics if job configuration validation fails with an error.
    pub fn new(config: AppConfig, coordinator: Arc<Coordinator>, upload_dir: PathBuf) -> Self {
        match config.job.validate() {
            Ok(warnings) => {
                for warning in warnings {
                    tracing::warn!("Configuration warning: {}", warning);
                }
            }
            Err(error) => {
                panic!("Invalid job configuration: {}", error);
            }
        }

        Self {
            config: Arc::new(config),
            coordinator,
            upload_dir,
        }
    }

    /// Keepalive ping interval for progress connections.
    ///
    /// Returns a default of 15 seconds if configured as zero (to prevent
    /// tokio::time::interval from panicking).
    pub fn ping_interval(&self) -> Duration {
        let secs = self.config.server.ping_interval_secs;
        if secs == 0 {
            tracing::warn!("server.ping_interval_secs is 0, using default of 15 seconds");
            Duration::from_secs(15)
        } else {
            Duration::from_secs(secs)
        }
    }

    /// Idle horizon after which undrained sessions are reclaimed.
    pub fn session_stale_after(&self) -> Duration {
        Duration::from_secs(self.config.server.session_stale_secs)
    }
}
