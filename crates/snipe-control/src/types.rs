//! Control API types.

use serde::Serialize;

use snipe_core::EventRecord;
use snipe_monitor::SessionStatus;

/// `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub monitoring: bool,
}

/// Result of a start/stop action.
#[derive(Debug, Clone, Serialize)]
pub struct ActionResponse {
    pub ok: bool,
    pub message: String,
}

impl ActionResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Message pushed over the `/ws` stream.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "channel", content = "data", rename_all = "snake_case")]
pub enum StreamMessage {
    /// Full status; sent on connect and whenever availability or the loop changes.
    Status(SessionStatus),
    /// One core event.
    Event(EventRecord),
}
