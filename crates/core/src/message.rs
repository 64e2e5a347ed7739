//! Progress channel wire messages.

use crate::stem::StemSet;
use serde::{Deserialize, Serialize};

/// A message on the per-job progress channel.
///
/// Serialized as `{"type": ..., "data": {...}}`; the unit variants omit
/// `data`. This is a closed set: every handler matches exhaustively.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum Message {
    /// Progress update; `percent` is non-decreasing within a session.
    Progress { percent: f32, status: String },
    /// Terminal success with the committed artifact set.
    Complete { artifacts: StemSet },
    /// Terminal failure.
    Error { reason: String },
    /// Server keepalive.
    Ping,
    /// Reply to a ping.
    Pong,
}

impl Message {
    /// Whether this message terminates the session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Message::Complete { .. } | Message::Error { .. })
    }
}
