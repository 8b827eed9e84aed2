//! Client side of the OpenAI Realtime WebSocket protocol.
//!
//! - `transport`: the [`Transport`] and [`Connector`] seams the session loop is written against.
//! - `client`: the tokio-tungstenite implementation with keepalive pings.
//! - `error`: connection errors and the server error classification table.

pub mod client;
pub mod error;
pub mod transport;

pub use client::{ClientConfig, KeepaliveConfig, RealtimeClient};
pub use error::{
    RealtimeError, RecoverableServerError, ServerErrorClass, classify_server_error,
    KEEPALIVE_TIMEOUT_MARKER,
};
pub use openai_realtime_types as types;
pub use transport::{Connector, Inbound, Transport};
