//! WebSocket connection to the OpenAI Realtime API.

use crate::{
    error::RealtimeError,
    transport::{Connector, Inbound, Transport},
};
use async_trait::async_trait;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tokio::{
    net::TcpStream,
    time::{Instant, timeout},
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        self,
        client::IntoClientRequest,
        http::HeaderValue,
        protocol::Message,
    },
};
use tracing::{debug, info};

pub const DEFAULT_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";
pub const DEFAULT_REALTIME_MODEL: &str = "gpt-4o-realtime-preview-2024-10-01";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Client-side keepalive. A ping is sent every `interval`; a missing pong
/// after `timeout` fails the connection with a keepalive timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(20),
            timeout: Duration::from_secs(20),
        }
    }
}

/// Everything needed to open a realtime connection.
#[derive(Debug)]
pub struct ClientConfig {
    pub url: String,
    pub model: String,
    pub api_key: SecretString,
    pub keepalive: KeepaliveConfig,
}

impl ClientConfig {
    pub fn new(api_key: SecretString) -> Self {
        Self {
            url: DEFAULT_REALTIME_URL.to_string(),
            model: DEFAULT_REALTIME_MODEL.to_string(),
            api_key,
            keepalive: KeepaliveConfig::default(),
        }
    }

    /// The full WebSocket URL including the model query parameter.
    pub fn endpoint(&self) -> String {
        let separator = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{}model={}", self.url, separator, self.model)
    }
}

/// A live connection to the realtime endpoint.
pub struct RealtimeClient {
    sink: SplitSink<WsStream, Message>,
    stream: SplitStream<WsStream>,
    keepalive: KeepaliveConfig,
    next_ping: Instant,
    awaiting_pong: Option<Instant>,
    closed: bool,
}

impl RealtimeClient {
    /// Opens the WebSocket with the bearer token and realtime beta headers.
    pub async fn connect(config: &ClientConfig) -> Result<Self, RealtimeError> {
        let endpoint = config.endpoint();
        let mut request = endpoint.as_str().into_client_request()?;
        let auth = HeaderValue::from_str(&format!("Bearer {}", config.api_key.expose_secret()))
            .map_err(|e| RealtimeError::InvalidRequest(e.to_string()))?;
        request.headers_mut().insert("Authorization", auth);
        request
            .headers_mut()
            .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        let (ws_stream, _) = connect_async(request).await?;
        let (sink, stream) = ws_stream.split();
        info!(url = %config.url, model = %config.model, "Connected to OpenAI Realtime API.");

        Ok(Self {
            sink,
            stream,
            keepalive: config.keepalive,
            next_ping: Instant::now() + config.keepalive.interval,
            awaiting_pong: None,
            closed: false,
        })
    }

    /// Sends a ping when one is due and none is outstanding.
    async fn ping_if_due(&mut self) -> Result<(), RealtimeError> {
        let now = Instant::now();
        if self.awaiting_pong.is_none() && now >= self.next_ping {
            self.sink.send(Message::Ping(Default::default())).await?;
            self.awaiting_pong = Some(now);
            self.next_ping = now + self.keepalive.interval;
        }
        Ok(())
    }

    /// Fails once the outstanding ping has gone unanswered for the timeout.
    /// Only consulted after a read found nothing waiting on the socket.
    fn check_pong_deadline(&self) -> Result<(), RealtimeError> {
        match self.awaiting_pong {
            Some(sent) if sent.elapsed() >= self.keepalive.timeout => {
                Err(RealtimeError::KeepaliveTimeout(self.keepalive.timeout))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Transport for RealtimeClient {
    async fn send_text(&mut self, text: String) -> Result<(), RealtimeError> {
        self.sink.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn recv(&mut self, wait: Duration) -> Result<Inbound, RealtimeError> {
        self.ping_if_due().await?;

        let next = match timeout(wait, self.stream.next()).await {
            Ok(next) => next,
            Err(_) => {
                self.check_pong_deadline()?;
                return Ok(Inbound::Idle);
            }
        };
        match next {
            None => Ok(Inbound::Closed(None)),
            Some(Err(e)) => Err(e.into()),
            Some(Ok(Message::Text(text))) => Ok(Inbound::Text(text.to_string())),
            Some(Ok(Message::Pong(_))) => {
                self.awaiting_pong = None;
                Ok(Inbound::Idle)
            }
            Some(Ok(Message::Ping(_))) => {
                // The pong is queued by tungstenite and written on flush.
                self.sink.flush().await?;
                Ok(Inbound::Idle)
            }
            Some(Ok(Message::Close(frame))) => {
                debug!(?frame, "Realtime endpoint sent a close frame.");
                Ok(Inbound::Closed(frame.map(|f| f.reason.to_string())))
            }
            Some(Ok(_)) => Ok(Inbound::Idle),
        }
    }

    async fn close(&mut self) -> Result<(), RealtimeError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match self.sink.close().await {
            Ok(())
            | Err(tungstenite::Error::ConnectionClosed)
            | Err(tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Connector for ClientConfig {
    async fn connect(&self) -> Result<Box<dyn Transport>, RealtimeError> {
        Ok(Box::new(RealtimeClient::connect(self).await?))
    }
}
