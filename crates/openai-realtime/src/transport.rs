//! The seams between the session loop and the network.

use crate::error::RealtimeError;
use async_trait::async_trait;
use openai_realtime_types::ClientEvent;
use std::time::Duration;
use tracing::{debug, trace};

/// One read attempt on the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A complete text frame holding one JSON event.
    Text(String),
    /// Nothing arrived before the wait elapsed, or a control frame was consumed.
    Idle,
    /// The peer closed the connection, with the close reason if one was given.
    Closed(Option<String>),
}

/// A duplex, message-oriented connection to the realtime endpoint.
///
/// Implementations are driven by a single owner through `&mut self`, so an
/// outbound message is always written completely before the next one starts.
#[async_trait]
pub trait Transport: Send {
    async fn send_text(&mut self, text: String) -> Result<(), RealtimeError>;

    /// Waits at most `wait` for the next message.
    async fn recv(&mut self, wait: Duration) -> Result<Inbound, RealtimeError>;

    async fn close(&mut self) -> Result<(), RealtimeError>;

    /// Serializes and sends one protocol event.
    async fn send_event(&mut self, event: &ClientEvent) -> Result<(), RealtimeError> {
        let text = serde_json::to_string(event)?;
        match event {
            ClientEvent::InputAudioBufferAppend { .. } => {
                trace!(direction = "out", event = event.kind(), bytes = text.len())
            }
            _ => debug!(direction = "out", event = event.kind()),
        }
        self.send_text(text).await
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    async fn send_text(&mut self, text: String) -> Result<(), RealtimeError> {
        (**self).send_text(text).await
    }

    async fn recv(&mut self, wait: Duration) -> Result<Inbound, RealtimeError> {
        (**self).recv(wait).await
    }

    async fn close(&mut self) -> Result<(), RealtimeError> {
        (**self).close().await
    }
}

/// Opens fresh transports; one call per connection attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Transport>, RealtimeError>;
}
