//! HTTP request handlers.

pub mod jobs;
pub mod ws;

pub use jobs::*;
pub use ws::*;
