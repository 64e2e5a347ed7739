//! HTTP/WebSocket control plane for Stemwell.
//!
//! This crate provides:
//! - Submission, status, and cancellation endpoints
//! - The job coordinator (single-flight per fingerprint, global ceiling,
//!   cooperative cancellation, stall watchdog)
//! - Per-job progress sessions streamed over WebSocket with keepalive

pub mod coordinator;
pub mod error;
pub mod handlers;
pub mod progress;
pub mod routes;
pub mod state;

pub use coordinator::Coordinator;
pub use error::{ApiError, ApiResult};
pub use progress::{ProgressSession, SessionRegistry};
pub use routes::create_router;
pub use state::AppState;
