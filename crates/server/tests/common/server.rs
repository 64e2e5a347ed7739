//! Server test utilities.

use super::engine::FakeEngine;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use stemwell_core::config::AppConfig;
use stemwell_core::{JobId, JobState};
use stemwell_engine::SeparationEngine;
use stemwell_server::progress::SessionRegistry;
use stemwell_server::{AppState, Coordinator, create_router};
use stemwell_store::StemStore;
use tempfile::TempDir;

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    pub engine: Arc<FakeEngine>,
    pub sessions: Arc<SessionRegistry>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server with temporary storage.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

        let mut config = AppConfig::for_testing();
        config.store.root = temp_dir.path().join("stems");
        modifier(&mut config);

        let store = StemStore::open(&config.store.root)
            .await
            .expect("Failed to open stem store");

        let engine = Arc::new(FakeEngine::new());
        let engine_dyn: Arc<dyn SeparationEngine> = engine.clone();

        let sessions = Arc::new(SessionRegistry::new());
        let coordinator = Arc::new(Coordinator::new(
            store,
            engine_dyn,
            sessions.clone(),
            config.job.clone(),
        ));

        let upload_dir = config.store.root.join(".incoming");
        let state = AppState::new(config, coordinator, upload_dir);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            engine,
            sessions,
            _temp_dir: temp_dir,
        }
    }

    /// Get the coordinator.
    pub fn coordinator(&self) -> Arc<Coordinator> {
        self.state.coordinator.clone()
    }

    /// Poll a job until it reaches a terminal state.
    pub async fn wait_terminal(&self, job_id: JobId) -> JobState {
        for _ in 0..500 {
            let snapshot = self
                .state
                .coordinator
                .status(job_id)
                .await
                .expect("job disappeared while waiting");
            if snapshot.state.is_terminal() {
                return snapshot.state;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {job_id} never reached a terminal state");
    }

    /// Serve the router on an ephemeral port for WebSocket tests.
    pub async fn serve(&self) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test listener");
        let addr = listener.local_addr().expect("listener has no local addr");
        let router = self.router.clone();
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("test server failed");
        });
        addr
    }
}
