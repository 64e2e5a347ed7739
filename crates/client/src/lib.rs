//! Client library for Stemwell.
//!
//! This crate provides:
//! - An HTTP API client for submitting audio and tracking jobs
//! - A WebSocket progress channel with transparent, bounded reconnection
//! - A tiered result cache (fast in-memory LRU over a slow disk tier)
//! - A persisted resume-session store for reattaching after restarts

pub mod api;
pub mod cache;
pub mod channel;
pub mod error;
pub mod session;

pub use api::ApiClient;
pub use cache::{CacheConfig, TieredCache};
pub use channel::{ChannelConfig, ChannelEvent, ProgressChannel};
pub use error::{ClientError, ClientResult};
pub use session::SessionStore;
