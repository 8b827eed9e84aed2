use std::time::Duration;
use tokio_tungstenite::tungstenite;

/// Substring that marks a connection loss caused by a missed keepalive pong.
/// Errors carrying it are the only ones worth reconnecting after.
pub const KEEPALIVE_TIMEOUT_MARKER: &str = "keepalive ping timeout";

/// Errors raised by the realtime connection.
#[derive(Debug, thiserror::Error)]
pub enum RealtimeError {
    #[error("keepalive ping timeout: no pong received within {0:?}")]
    KeepaliveTimeout(Duration),
    #[error("connection closed: {0}")]
    Closed(String),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("invalid connection request: {0}")]
    InvalidRequest(String),
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

impl RealtimeError {
    /// Whether the connection may be re-established after this error.
    ///
    /// Only keepalive timeouts qualify, matched by message so that a close
    /// frame whose reason reports the same condition is treated alike.
    pub fn is_transient(&self) -> bool {
        self.to_string().contains(KEEPALIVE_TIMEOUT_MARKER)
    }
}

/// Server-reported errors that do not end the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverableServerError {
    /// A commit arrived while the input buffer held no audio.
    EmptyBuffer,
    /// `response.create` was sent while a response was still in flight.
    ActiveResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerErrorClass {
    Recoverable(RecoverableServerError),
    Fatal,
}

/// Message substrings of server errors that are absorbed by the session loop.
pub const RECOVERABLE_SERVER_ERRORS: &[(&str, RecoverableServerError)] = &[
    ("buffer is empty", RecoverableServerError::EmptyBuffer),
    (
        "Conversation already has an active response",
        RecoverableServerError::ActiveResponse,
    ),
];

/// Classifies the `message` of a server `error` event.
pub fn classify_server_error(message: &str) -> ServerErrorClass {
    RECOVERABLE_SERVER_ERRORS
        .iter()
        .find(|(needle, _)| message.contains(needle))
        .map(|(_, kind)| ServerErrorClass::Recoverable(*kind))
        .unwrap_or(ServerErrorClass::Fatal)
}
