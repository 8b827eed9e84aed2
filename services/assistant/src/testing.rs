//! In-memory stand-ins for the network and the audio devices.

use crate::audio::AudioError;
use crate::audio::playback::{OutputDevice, OutputOpener};
use crate::context::{SessionContext, SessionSettings, VadSettings};
use crate::observer::ActivityObserver;
use crate::runtime_log::RuntimeLog;
use assistant_core::ToolRegistry;
use assistant_core::tools::{ScratchPad, register_builtin_tools};
use async_trait::async_trait;
use openai_realtime::types::Voice;
use openai_realtime::{Connector, Inbound, RealtimeError, Transport};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// One scripted inbound text event.
pub fn event(value: Value) -> Result<Inbound, RealtimeError> {
    Ok(Inbound::Text(value.to_string()))
}

/// A context with the builtin tools and a disabled runtime log.
pub fn test_context(observer: Arc<dyn ActivityObserver>) -> SessionContext {
    let mut registry = ToolRegistry::new();
    register_builtin_tools(
        &mut registry,
        ScratchPad::new(std::env::temp_dir().join("assistant-test-scratch")),
    );
    SessionContext::new(
        SessionSettings {
            voice: Voice::Alloy,
            instructions: "Test assistant.".to_string(),
            vad: VadSettings::default(),
        },
        Arc::new(registry),
        observer,
        RuntimeLog::disabled(),
    )
}

#[derive(Default)]
struct TransportState {
    script: VecDeque<Result<Inbound, RealtimeError>>,
    sent: Vec<Value>,
    closes: usize,
}

/// Replays a fixed sequence of receive results and records what is sent.
///
/// Once the script runs out it either cancels the attached token and reports
/// idle, or reports the connection as closed.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    state: Arc<Mutex<TransportState>>,
    done: Option<CancellationToken>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Result<Inbound, RealtimeError>>) -> Self {
        Self {
            state: Arc::new(Mutex::new(TransportState {
                script: script.into(),
                ..Default::default()
            })),
            done: None,
        }
    }

    pub fn shutdown_when_done(mut self, token: CancellationToken) -> Self {
        self.done = Some(token);
        self
    }

    pub fn sent(&self) -> Vec<Value> {
        self.state.lock().sent.clone()
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().closes
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send_text(&mut self, text: String) -> Result<(), RealtimeError> {
        let value = serde_json::from_str(&text)?;
        self.state.lock().sent.push(value);
        Ok(())
    }

    async fn recv(&mut self, _wait: Duration) -> Result<Inbound, RealtimeError> {
        tokio::task::yield_now().await;
        let next = self.state.lock().script.pop_front();
        match (next, &self.done) {
            (Some(result), _) => result,
            (None, Some(token)) => {
                token.cancel();
                Ok(Inbound::Idle)
            }
            (None, None) => Ok(Inbound::Closed(None)),
        }
    }

    async fn close(&mut self) -> Result<(), RealtimeError> {
        self.state.lock().closes += 1;
        Ok(())
    }
}

/// Hands out prepared transports (or errors) in order.
#[derive(Default)]
pub struct ScriptedConnector {
    attempts: Mutex<VecDeque<Result<ScriptedTransport, RealtimeError>>>,
    connects: AtomicUsize,
}

impl ScriptedConnector {
    pub fn new(attempts: Vec<Result<ScriptedTransport, RealtimeError>>) -> Self {
        Self {
            attempts: Mutex::new(attempts.into()),
            connects: AtomicUsize::new(0),
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, RealtimeError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        match self.attempts.lock().pop_front() {
            Some(Ok(transport)) => Ok(Box::new(transport)),
            Some(Err(e)) => Err(e),
            None => Err(RealtimeError::Closed("no more scripted connections".into())),
        }
    }
}

#[derive(Default)]
struct SinkState {
    writes: Vec<Vec<u8>>,
    opened: usize,
    closed: usize,
    buffered: Duration,
    fail_open: bool,
}

/// An output opener whose devices record every write.
#[derive(Clone, Default)]
pub struct RecordingSink {
    state: Arc<Mutex<SinkState>>,
}

impl RecordingSink {
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state.lock().writes.clone()
    }

    pub fn opened(&self) -> usize {
        self.state.lock().opened
    }

    pub fn closed(&self) -> usize {
        self.state.lock().closed
    }

    /// What every opened device reports as still queued.
    pub fn set_buffered(&self, buffered: Duration) {
        self.state.lock().buffered = buffered;
    }

    pub fn fail_open(&self) {
        self.state.lock().fail_open = true;
    }
}

impl OutputOpener for RecordingSink {
    fn open(&self) -> Result<Box<dyn OutputDevice>, AudioError> {
        let mut state = self.state.lock();
        if state.fail_open {
            return Err(AudioError::NoDevice("output"));
        }
        state.opened += 1;
        Ok(Box::new(RecordingOutput {
            state: self.state.clone(),
            open: true,
        }))
    }
}

struct RecordingOutput {
    state: Arc<Mutex<SinkState>>,
    open: bool,
}

impl OutputDevice for RecordingOutput {
    fn write(&mut self, pcm: &[u8]) -> Result<(), AudioError> {
        self.state.lock().writes.push(pcm.to_vec());
        Ok(())
    }

    fn buffered(&self) -> Duration {
        self.state.lock().buffered
    }

    fn close(&mut self) {
        if std::mem::replace(&mut self.open, false) {
            self.state.lock().closed += 1;
        }
    }
}

/// Records what the session reports for visualization.
#[derive(Default)]
pub struct RecordingObserver {
    active: AtomicBool,
    speaking: AtomicBool,
    energies: Mutex<Vec<f32>>,
}

impl RecordingObserver {
    pub fn active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }

    pub fn energies(&self) -> Vec<f32> {
        self.energies.lock().clone()
    }
}

impl ActivityObserver for RecordingObserver {
    fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    fn set_assistant_speaking(&self, speaking: bool) {
        self.speaking.store(speaking, Ordering::SeqCst);
    }

    fn update_energy(&self, energy: f32) {
        self.energies.lock().push(energy);
    }
}
