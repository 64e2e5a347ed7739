//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Maximum accepted upload size in bytes.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
    /// Keepalive ping interval in seconds. Must stay below typical proxy
    /// idle timeouts or intermediaries will silently drop the connection.
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    /// Seconds before a progress session with no activity is considered stale.
    #[serde(default = "default_session_stale_secs")]
    pub session_stale_secs: u64,
    /// Interval between stale-session sweeps, in seconds.
    #[serde(default = "default_session_sweep_interval_secs")]
    pub session_sweep_interval_secs: u64,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_max_upload_bytes() -> u64 {
    crate::MAX_UPLOAD_SIZE
}

fn default_ping_interval_secs() -> u64 {
    15
}

fn default_session_stale_secs() -> u64 {
    300
}

fn default_session_sweep_interval_secs() -> u64 {
    60
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_upload_bytes: default_max_upload_bytes(),
            ping_interval_secs: default_ping_interval_secs(),
            session_stale_secs: default_session_stale_secs(),
            session_sweep_interval_secs: default_session_sweep_interval_secs(),
        }
    }
}

/// Job coordinator configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobConfig {
    /// Global ceiling on concurrently running separation jobs.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    /// Seconds a running job may go without progress activity before it is
    /// treated as failed and its fingerprint lock released.
    #[serde(default = "default_stall_timeout_secs")]
    pub stall_timeout_secs: u64,
    /// Interval between stall-watchdog checks, in seconds.
    #[serde(default = "default_watchdog_interval_secs")]
    pub watchdog_interval_secs: u64,
}

fn default_max_concurrent_jobs() -> usize {
    2
}

fn default_stall_timeout_secs() -> u64 {
    600
}

fn default_watchdog_interval_secs() -> u64 {
    10
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            stall_timeout_secs: default_stall_timeout_secs(),
            watchdog_interval_secs: default_watchdog_interval_secs(),
        }
    }
}

impl JobConfig {
    /// Get the stall timeout as a Duration.
    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout_secs.max(1))
    }

    /// Validate the configuration, returning warnings for risky settings.
    pub fn validate(&self) -> Result<Vec<String>, String> {
        if self.max_concurrent_jobs == 0 {
            return Err("job.max_concurrent_jobs must be at least 1".to_string());
        }
        let mut warnings = Vec::new();
        if self.stall_timeout_secs < 60 {
            warnings.push(format!(
                "job.stall_timeout_secs = {} is very low; separation of a \
                 full-length song routinely takes minutes",
                self.stall_timeout_secs
            ));
        }
        Ok(warnings)
    }
}

/// Artifact store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Root directory for committed stem entries.
    #[serde(default = "default_store_root")]
    pub root: PathBuf,
}

fn default_store_root() -> PathBuf {
    PathBuf::from("data/stems")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: default_store_root(),
        }
    }
}

/// Garbage collection configuration for the artifact store.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GcConfig {
    /// Interval between sweeps, in seconds. Zero disables the sweeper.
    #[serde(default = "default_gc_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Staging directories older than this are treated as orphaned
    /// (left behind by a crashed worker) and removed.
    #[serde(default = "default_staging_grace_secs")]
    pub staging_grace_secs: u64,
    /// Committed entries older than this are removed. Zero keeps them forever.
    #[serde(default)]
    pub entry_ttl_secs: u64,
}

fn default_gc_interval_secs() -> u64 {
    3600
}

fn default_staging_grace_secs() -> u64 {
    3600
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_gc_interval_secs(),
            staging_grace_secs: default_staging_grace_secs(),
            entry_ttl_secs: 0,
        }
    }
}

/// Separation engine configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Separator program to invoke.
    #[serde(default = "default_engine_program")]
    pub program: String,
    /// Arguments passed before the input path and output directory.
    #[serde(default)]
    pub args: Vec<String>,
}

fn default_engine_program() -> String {
    "demucs-separate".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: default_engine_program(),
            args: Vec::new(),
        }
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Artifact store configuration.
    #[serde(default)]
    pub store: StoreConfig,
    /// Job coordinator configuration.
    #[serde(default)]
    pub job: JobConfig,
    /// Garbage collection configuration.
    #[serde(default)]
    pub gc: GcConfig,
    /// Separation engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Points the store at a relative path the caller
    /// is expected to override with a tempdir.
    pub fn for_testing() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.ping_interval_secs, 15);
        assert_eq!(config.session_stale_secs, 300);
    }

    #[test]
    fn test_job_config_rejects_zero_ceiling() {
        let config = JobConfig {
            max_concurrent_jobs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_job_config_warns_on_low_stall_timeout() {
        let config = JobConfig {
            stall_timeout_secs: 5,
            ..Default::default()
        };
        let warnings = config.validate().unwrap();
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_gc_config_deserialize_defaults() {
        let config: GcConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.staging_grace_secs, 3600);
        assert_eq!(config.entry_ttl_secs, 0, "entries kept forever by default");
    }

    #[test]
    fn test_app_config_from_partial_toml_shape() {
        let json = r#"{"server": {"bind": "0.0.0.0:9000"}}"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:9000");
        assert_eq!(config.job.max_concurrent_jobs, 2);
    }
}
