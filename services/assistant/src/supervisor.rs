//! Connection lifecycle: connect, run one session, reconnect when the loss
//! is transient.

use crate::audio::AudioError;
use crate::audio::capture::{AudioSource, MicrophoneCapture};
use crate::audio::playback::{AudioPlayback, OutputOpener, SpeakerOpener};
use crate::context::SessionContext;
use crate::session::{Session, SessionError};
use openai_realtime::Connector;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};

/// Where each session gets its microphone and speaker from.
pub trait AudioDevices: Send + Sync {
    fn open_capture(&self) -> Result<Box<dyn AudioSource>, AudioError>;

    fn output(&self) -> Arc<dyn OutputOpener>;
}

/// The host's default input and output devices.
pub struct SystemAudio {
    queue_secs: f32,
    output: Arc<SpeakerOpener>,
}

impl SystemAudio {
    pub fn new(queue_secs: f32) -> Self {
        Self {
            queue_secs,
            output: Arc::new(SpeakerOpener),
        }
    }
}

impl AudioDevices for SystemAudio {
    fn open_capture(&self) -> Result<Box<dyn AudioSource>, AudioError> {
        Ok(Box::new(MicrophoneCapture::open(self.queue_secs)?))
    }

    fn output(&self) -> Arc<dyn OutputOpener> {
        self.output.clone()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    /// Gives up after this many consecutive transient failures. `None`
    /// retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(1),
            max_attempts: None,
        }
    }
}

pub struct ReconnectSupervisor {
    connector: Arc<dyn Connector>,
    devices: Arc<dyn AudioDevices>,
    context: Arc<SessionContext>,
    policy: ReconnectPolicy,
}

impl ReconnectSupervisor {
    pub fn new(
        connector: Arc<dyn Connector>,
        devices: Arc<dyn AudioDevices>,
        context: Arc<SessionContext>,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            connector,
            devices,
            context,
            policy,
        }
    }

    /// Runs sessions until shutdown or a non-transient failure.
    ///
    /// Resources of a failed session are released before the next attempt.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), SessionError> {
        let mut attempt: u32 = 0;
        loop {
            if shutdown.is_cancelled() {
                return Ok(());
            }
            attempt += 1;
            let result = self
                .run_once(&shutdown)
                .instrument(info_span!("connection", attempt))
                .await;

            match result {
                Ok(()) => {
                    info!("Assistant stopped.");
                    return Ok(());
                }
                Err(e) if e.is_transient() => {
                    if self.policy.max_attempts.is_some_and(|max| attempt >= max) {
                        error!(error = %e, attempt, "Giving up after repeated connection loss.");
                        return Err(e);
                    }
                    warn!(
                        error = %e,
                        delay = ?self.policy.delay,
                        "Connection lost, reconnecting."
                    );
                    tokio::select! {
                        _ = shutdown.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(self.policy.delay) => {}
                    }
                }
                Err(e) => {
                    error!(error = %e, "Session failed.");
                    return Err(e);
                }
            }
        }
    }

    async fn run_once(&self, shutdown: &CancellationToken) -> Result<(), SessionError> {
        info!("Connecting to the realtime endpoint.");
        let mut transport = self.connector.connect().await?;
        info!("Connected.");

        // Device setup waits on the audio thread's handshake.
        let devices = self.devices.clone();
        let opened = tokio::task::spawn_blocking(move || devices.open_capture())
            .await
            .unwrap_or(Err(AudioError::ThreadGone));
        let capture = match opened {
            Ok(capture) => capture,
            Err(e) => {
                let _ = transport.close().await;
                return Err(e.into());
            }
        };
        let playback = AudioPlayback::new(self.devices.output(), self.context.observer.clone());
        Session::new(self.context.clone(), transport, capture, playback)
            .run(shutdown)
            .await
    }
}
