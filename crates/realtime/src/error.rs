//! Error types for the realtime client.

use thiserror::Error;

/// Errors surfaced by the realtime client.
///
/// Transient transport failures are absorbed by the reconnect machinery and
/// never appear here; these variants cover caller-visible misuse and
/// serialization problems.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// WebSocket-level failure.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RealtimeError>;

impl From<tokio_tungstenite::tungstenite::Error> for RealtimeError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        RealtimeError::WebSocket(err.to_string())
    }
}
