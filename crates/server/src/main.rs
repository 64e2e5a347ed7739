//! Stemwell server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use stemwell_core::config::AppConfig;
use stemwell_engine::{CommandEngine, SeparationEngine};
use stemwell_server::progress::SessionRegistry;
use stemwell_server::{AppState, Coordinator, create_router};
use stemwell_store::StemStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Stemwell - an audio stem separation service
#[derive(Parser, Debug)]
#[command(name = "stemwelld")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "STEMWELL_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Stemwell v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration (file is optional, env vars can provide/override
    // everything)
    let config_path = std::path::Path::new(&args.config);
    let mut figment = Figment::new();
    if config_path.exists() {
        tracing::info!(config_path = %args.config, "Loading configuration from file");
        figment = figment.merge(Toml::file(&args.config));
    } else {
        tracing::debug!("No config file found at {}, using defaults and environment", args.config);
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("STEMWELL_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    // Open the stem store before accepting requests; configuration errors
    // surface here instead of on the first upload.
    let store = StemStore::open(&config.store.root)
        .await
        .context("failed to open stem store")?;
    tracing::info!(root = %config.store.root.display(), "Stem store opened");

    let engine: Arc<dyn SeparationEngine> = Arc::new(CommandEngine::new(&config.engine));
    tracing::info!(engine = engine.name(), program = %config.engine.program, "Separation engine configured");

    let sessions = Arc::new(SessionRegistry::new());
    let coordinator = Arc::new(Coordinator::new(
        store,
        engine,
        sessions.clone(),
        config.job.clone(),
    ));

    let upload_dir = config.store.root.join(".incoming");
    tokio::fs::create_dir_all(&upload_dir)
        .await
        .context("failed to create upload spool directory")?;

    let state = AppState::new(config.clone(), coordinator.clone(), upload_dir);

    // Stall watchdog: fail jobs whose engine run stops reporting progress.
    {
        let coordinator = coordinator.clone();
        let interval = Duration::from_secs(config.job.watchdog_interval_secs.max(1));
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let failed = coordinator.watchdog_pass().await;
                if failed > 0 {
                    tracing::warn!(failed, "watchdog failed stalled jobs");
                }
            }
        });
        tracing::info!(interval_secs = interval.as_secs(), "Stall watchdog spawned");
    }

    // Stale session sweeper frees sessions nobody drained after the job
    // reached a terminal state.
    {
        let coordinator = coordinator.clone();
        let sessions = sessions.clone();
        let stale_after = state.session_stale_after();
        let interval = Duration::from_secs(config.server.session_sweep_interval_secs.max(1));
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let swept = sessions.sweep_stale(stale_after).await;
                let dropped = coordinator.sweep_terminal_jobs(stale_after).await;
                if swept > 0 || dropped > 0 {
                    tracing::info!(swept, dropped, "cleaned up stale sessions");
                }
            }
        });
        tracing::info!(interval_secs = interval.as_secs(), "Session sweeper spawned");
    }

    // Store GC sweeper removes orphaned staging dirs and expired entries.
    if config.gc.sweep_interval_secs > 0 {
        let gc = config.gc.clone();
        let root = config.store.root.clone();
        let interval = Duration::from_secs(config.gc.sweep_interval_secs);
        tokio::spawn(async move {
            // The sweeper holds its own store handle; sweeps touch only
            // staging orphans and expired entries, never in-flight output.
            let store = match StemStore::open(&root).await {
                Ok(store) => store,
                Err(e) => {
                    tracing::error!(error = %e, "GC sweeper failed to open store, disabled");
                    return;
                }
            };
            loop {
                tokio::time::sleep(interval).await;
                match store.sweep(&gc).await {
                    Ok(stats) => {
                        if stats.staging_removed > 0 || stats.entries_removed > 0 {
                            tracing::info!(
                                staging_removed = stats.staging_removed,
                                entries_removed = stats.entries_removed,
                                bytes_reclaimed = stats.bytes_reclaimed,
                                "GC sweep completed"
                            );
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "GC sweep failed"),
                }
            }
        });
        tracing::info!(
            interval_secs = config.gc.sweep_interval_secs,
            "GC sweeper spawned"
        );
    } else {
        tracing::info!("GC sweeping disabled");
    }

    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}
