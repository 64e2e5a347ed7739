//! Route configuration.

use crate::handlers;
use crate::state::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    // Body limit leaves headroom over the configured upload cap so the
    // handler can answer with a structured 413 instead of a connection reset.
    let body_limit = (state.config.server.max_upload_bytes as usize).saturating_add(64 * 1024);

    Router::new()
        // Health check (intentionally unauthenticated for load balancers/probes)
        .route("/v1/health", get(handlers::health_check))
        // Job control plane
        .route("/v1/jobs", post(handlers::submit_job))
        .route("/v1/jobs/{job_id}", get(handlers::get_job))
        .route("/v1/jobs/{job_id}/cancel", post(handlers::cancel_job))
        // Progress channel
        .route("/v1/jobs/{job_id}/ws", get(handlers::job_progress_ws))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
