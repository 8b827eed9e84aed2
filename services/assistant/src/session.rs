//! One realtime session: configure, stream, react, tear down.
//!
//! The loop is single-threaded and suspends only on the capture poll send,
//! the bounded receive, tool invocation, and playback drain. Inbound events
//! are handled strictly in arrival order, and a tool call runs to completion
//! before the next event is read.

use crate::audio::capture::AudioSource;
use crate::audio::playback::AudioPlayback;
use crate::audio::{AudioError, decode_base64, encode_base64, pcm16_energy};
use crate::context::SessionContext;
use crate::runtime_log::RESPONSE_LATENCY;
use crate::turn::TurnStateMachine;
use assistant_core::ToolDispatcher;
use openai_realtime::types::{ClientEvent, OutputItem, ServerEvent};
use openai_realtime::{
    Inbound, RealtimeError, ServerErrorClass, Transport, classify_server_error,
};
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Connection(#[from] RealtimeError),
    #[error("server error: {0}")]
    Server(String),
    #[error(transparent)]
    Audio(#[from] AudioError),
}

impl SessionError {
    /// Whether a new connection should be attempted after this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, SessionError::Connection(e) if e.is_transient())
    }
}

pub struct Session {
    context: Arc<SessionContext>,
    transport: Box<dyn Transport>,
    capture: Box<dyn AudioSource>,
    playback: AudioPlayback,
    turn: TurnStateMachine,
    dispatcher: ToolDispatcher,
    response_started: Option<Instant>,
    transcript: String,
}

impl Session {
    pub fn new(
        context: Arc<SessionContext>,
        transport: Box<dyn Transport>,
        capture: Box<dyn AudioSource>,
        playback: AudioPlayback,
    ) -> Self {
        let dispatcher = ToolDispatcher::new(context.tools.clone());
        Self {
            context,
            transport,
            capture,
            playback,
            turn: TurnStateMachine::new(),
            dispatcher,
            response_started: None,
            transcript: String::new(),
        }
    }

    /// Runs until shutdown or failure, then releases capture, playback and
    /// the connection in that order. `Ok(())` means shutdown was requested.
    #[instrument(name = "session", skip_all)]
    pub async fn run(mut self, shutdown: &CancellationToken) -> Result<(), SessionError> {
        let result = self.drive(shutdown).await;
        self.teardown().await;
        result
    }

    async fn drive(&mut self, shutdown: &CancellationToken) -> Result<(), SessionError> {
        self.transport
            .send_event(&self.context.session_update())
            .await?;
        self.capture.start()?;
        self.turn.capture_started();
        info!("Conversation started. Speak freely, and the assistant will respond.");

        loop {
            if shutdown.is_cancelled() {
                info!("Shutdown requested, ending session.");
                return Ok(());
            }
            self.pump_microphone().await?;

            let tick = self.context.tick;
            let inbound = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, ending session.");
                    return Ok(());
                }
                inbound = self.transport.recv(tick) => inbound?,
            };
            match inbound {
                Inbound::Idle => {}
                Inbound::Text(text) => self.handle_text(&text).await?,
                Inbound::Closed(reason) => {
                    let reason = reason.unwrap_or_else(|| "no close reason".to_string());
                    warn!(%reason, "WebSocket connection closed.");
                    return Err(RealtimeError::Closed(reason).into());
                }
            }
        }
    }

    /// Sends captured audio while recording and discards it otherwise.
    async fn pump_microphone(&mut self) -> Result<(), SessionError> {
        let Some(frame) = self.capture.poll()? else {
            return Ok(());
        };
        if !self.turn.is_recording() {
            trace!(bytes = frame.len(), "Discarding captured audio outside Recording.");
            return Ok(());
        }
        self.context.observer.update_energy(pcm16_energy(&frame));
        let audio = encode_base64(&frame);
        self.transport
            .send_event(&ClientEvent::InputAudioBufferAppend { audio })
            .await?;
        Ok(())
    }

    async fn handle_text(&mut self, text: &str) -> Result<(), SessionError> {
        let event = match serde_json::from_str::<ServerEvent>(text) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Ignoring undecodable server event.");
                return Ok(());
            }
        };
        match event {
            ServerEvent::AudioDelta { .. } => trace!(direction = "in", event = event.kind()),
            _ => debug!(direction = "in", event = event.kind()),
        }
        self.handle_event(event).await
    }

    async fn handle_event(&mut self, event: ServerEvent) -> Result<(), SessionError> {
        let observer = self.context.observer.clone();
        match event {
            ServerEvent::SessionCreated { .. } => info!("Session created."),
            ServerEvent::SessionUpdated { .. } => info!("Session configuration applied."),
            ServerEvent::SpeechStarted { .. } => {
                info!("Speech detected, listening...");
                observer.set_active(true);
            }
            ServerEvent::SpeechStopped { .. } => {
                if self.turn.speech_stopped() {
                    info!("Speech ended, processing...");
                    observer.set_active(false);
                    self.response_started = Some(Instant::now());
                    self.transport
                        .send_event(&ClientEvent::InputAudioBufferCommit)
                        .await?;
                }
            }
            ServerEvent::ResponseCreated { .. } => {
                self.turn.response_created();
                observer.set_active(true);
            }
            ServerEvent::OutputItemAdded { item } => {
                if let OutputItem::FunctionCall { call_id, name, .. } = item {
                    self.dispatcher.begin(call_id, name);
                }
            }
            ServerEvent::FunctionCallArgumentsDelta { call_id, delta } => {
                self.dispatcher.append(&call_id, &delta);
            }
            ServerEvent::FunctionCallArgumentsDone { call_id, .. } => {
                self.resolve_tool_call(&call_id).await?;
            }
            ServerEvent::TextDelta { delta } | ServerEvent::AudioTranscriptDelta { delta } => {
                self.transcript.push_str(&delta);
            }
            ServerEvent::AudioDelta { delta } => match decode_base64(&delta) {
                Ok(bytes) => self.playback.write(&bytes).await?,
                Err(e) => warn!(error = %e, "Dropping undecodable audio delta."),
            },
            ServerEvent::ResponseDone { .. } => self.complete_response().await?,
            ServerEvent::RateLimitsUpdated { rate_limits } => {
                debug!(?rate_limits, "Rate limits updated.");
                self.turn.rate_limits_updated();
            }
            ServerEvent::Error { error } => match classify_server_error(&error.message) {
                ServerErrorClass::Recoverable(kind) => {
                    info!(?kind, message = %error.message, "Absorbed recoverable server error.");
                }
                ServerErrorClass::Fatal => {
                    error!(
                        message = %error.message,
                        code = ?error.code,
                        "Unhandled server error."
                    );
                    let message = if error.message.is_empty() {
                        "server reported an error without a message".to_string()
                    } else {
                        error.message
                    };
                    return Err(SessionError::Server(message));
                }
            },
            ServerEvent::Unknown => {}
        }
        Ok(())
    }

    async fn resolve_tool_call(&mut self, call_id: &str) -> Result<(), SessionError> {
        let Some(output) = self.dispatcher.finish(call_id).await else {
            return Ok(());
        };
        self.context
            .runtime_log
            .record(&output.tool_name, output.elapsed)
            .await;
        for event in output.into_events() {
            self.transport.send_event(&event).await?;
        }
        Ok(())
    }

    async fn complete_response(&mut self) -> Result<(), SessionError> {
        if let Some(started) = self.response_started.take() {
            self.context
                .runtime_log
                .record(RESPONSE_LATENCY, started.elapsed())
                .await;
        }
        info!("Assistant response complete.");
        self.playback.finish().await;
        if !self.transcript.is_empty() {
            debug!(transcript = %self.transcript, "Discarding response transcript.");
            self.transcript.clear();
        }
        self.turn.response_done();
        self.context.observer.set_active(false);

        // Audio captured while the assistant spoke must not reach the server.
        if let Some(stale) = self.capture.poll()? {
            trace!(bytes = stale.len(), "Flushed audio captured during the response.");
        }
        info!("Started recording for next user input.");
        Ok(())
    }

    async fn teardown(&mut self) {
        self.capture.stop();
        self.capture.close();
        self.playback.finish().await;
        self.playback.close();
        if let Err(e) = self.transport.close().await {
            debug!(error = %e, "Error while closing the connection.");
        }
        let pending = self.dispatcher.pending_count();
        if pending > 0 {
            warn!(pending, "Dropping tool calls that never completed.");
        }
        self.dispatcher.clear();
        self.context.observer.set_active(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::capture::MockAudioSource;
    use crate::turn::TurnState;
    use crate::testing::{
        RecordingObserver, RecordingSink, ScriptedTransport, event, test_context,
    };
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A capture source that yields `frames` once each, then nothing.
    fn capture_with(frames: Vec<Vec<u8>>) -> (MockAudioSource, Arc<AtomicUsize>) {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut capture = MockAudioSource::new();
        capture.expect_start().returning(|| Ok(()));
        capture.expect_stop().returning(|| ());
        let counter = closes.clone();
        capture.expect_close().returning(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let mut frames = std::collections::VecDeque::from(frames);
        capture
            .expect_poll()
            .returning(move || Ok(frames.pop_front()));
        (capture, closes)
    }

    struct Harness {
        transport: ScriptedTransport,
        sink: RecordingSink,
        observer: Arc<RecordingObserver>,
        closes: Arc<AtomicUsize>,
        result: Result<(), SessionError>,
    }

    async fn run_script(script: Vec<Result<Inbound, RealtimeError>>, frames: Vec<Vec<u8>>) -> Harness {
        let shutdown = CancellationToken::new();
        let transport = ScriptedTransport::new(script).shutdown_when_done(shutdown.clone());
        let sink = RecordingSink::default();
        let observer = Arc::new(RecordingObserver::default());
        let context = Arc::new(test_context(observer.clone()));
        let (capture, closes) = capture_with(frames);
        let playback = AudioPlayback::new(Arc::new(sink.clone()), observer.clone());

        let session = Session::new(
            context,
            Box::new(transport.clone()),
            Box::new(capture),
            playback,
        );
        let result = session.run(&shutdown).await;
        Harness {
            transport,
            sink,
            observer,
            closes,
            result,
        }
    }

    fn types(sent: &[Value]) -> Vec<String> {
        sent.iter()
            .map(|v| v["type"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_update_is_sent_first() {
        let harness = run_script(vec![event(json!({"type": "session.created"}))], vec![]).await;
        assert!(harness.result.is_ok());
        let sent = harness.transport.sent();
        assert_eq!(sent[0]["type"], "session.update");
        assert_eq!(sent[0]["session"]["turn_detection"]["type"], "server_vad");
        assert!(!sent[0]["session"]["tools"].as_array().unwrap().is_empty());
        assert_eq!(harness.transport.close_count(), 1);
        assert_eq!(harness.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_current_time_tool_call() {
        let harness = run_script(
            vec![
                event(json!({
                    "type": "response.output_item.added",
                    "item": {"type": "function_call", "call_id": "1", "name": "get_current_time"}
                })),
                event(json!({"type": "response.function_call_arguments.delta", "call_id": "1", "delta": "{}"})),
                event(json!({"type": "response.function_call_arguments.done", "call_id": "1", "arguments": "{}"})),
            ],
            vec![],
        )
        .await;
        assert!(harness.result.is_ok());

        let sent = harness.transport.sent();
        assert_eq!(
            types(&sent)[1..],
            ["conversation.item.create", "response.create"]
        );
        let item = &sent[1]["item"];
        assert_eq!(item["type"], "function_call_output");
        assert_eq!(item["call_id"], "1");
        let output: Value = serde_json::from_str(item["output"].as_str().unwrap()).unwrap();
        assert!(output["current_time"].is_string());
    }

    #[tokio::test(start_paused = true)]
    async fn test_speech_stopped_commits_once() {
        let shutdown = CancellationToken::new();
        let transport = ScriptedTransport::new(vec![
            event(json!({"type": "input_audio_buffer.speech_started", "audio_start_ms": 10})),
            event(json!({"type": "input_audio_buffer.speech_stopped", "audio_end_ms": 900})),
            event(json!({"type": "input_audio_buffer.speech_stopped", "audio_end_ms": 950})),
        ])
        .shutdown_when_done(shutdown.clone());
        let observer = Arc::new(RecordingObserver::default());
        let (capture, _) = capture_with(vec![]);
        let mut session = Session::new(
            Arc::new(test_context(observer.clone())),
            Box::new(transport.clone()),
            Box::new(capture),
            AudioPlayback::new(Arc::new(RecordingSink::default()), observer),
        );

        session.drive(&shutdown).await.unwrap();
        assert_eq!(session.turn.state(), TurnState::AwaitingResponse);
        let commits = types(&transport.sent())
            .iter()
            .filter(|t| *t == "input_audio_buffer.commit")
            .count();
        assert_eq!(commits, 1);
        session.teardown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_arguments_invoke_with_empty_object() {
        let harness = run_script(
            vec![
                event(json!({
                    "type": "response.output_item.added",
                    "item": {"type": "function_call", "call_id": "c", "name": "get_random_number"}
                })),
                event(json!({"type": "response.function_call_arguments.delta", "call_id": "c", "delta": "{"})),
                event(json!({"type": "response.function_call_arguments.done", "call_id": "c"})),
            ],
            vec![],
        )
        .await;
        assert!(harness.result.is_ok());
        let sent = harness.transport.sent();
        let output: Value =
            serde_json::from_str(sent[1]["item"]["output"].as_str().unwrap()).unwrap();
        let n = output["random_number"].as_u64().unwrap();
        assert!((1..=100).contains(&n));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_tool_reports_not_found() {
        let harness = run_script(
            vec![
                event(json!({
                    "type": "response.output_item.added",
                    "item": {"type": "function_call", "call_id": "x", "name": "foo"}
                })),
                event(json!({"type": "response.function_call_arguments.done", "call_id": "x"})),
            ],
            vec![],
        )
        .await;
        let sent = harness.transport.sent();
        assert_eq!(
            sent[1]["item"]["output"],
            r#"{"error":"Function 'foo' not found."}"#
        );
        assert_eq!(sent[2]["type"], "response.create");
    }

    #[tokio::test(start_paused = true)]
    async fn test_audio_deltas_play_in_order_then_silence() {
        let chunks = [vec![1u8, 0, 1, 0], vec![2u8, 0], vec![3u8, 0, 3, 0, 3, 0]];
        let mut script = vec![event(json!({"type": "response.created"}))];
        for chunk in &chunks {
            script.push(event(json!({
                "type": "response.audio.delta",
                "delta": encode_base64(chunk)
            })));
        }
        script.push(event(json!({"type": "response.audio.delta", "delta": "%%%"})));
        script.push(event(json!({"type": "response.done"})));

        let harness = run_script(script, vec![]).await;
        assert!(harness.result.is_ok());
        let writes = harness.sink.writes();
        assert_eq!(writes.len(), 4);
        assert_eq!(writes[..3], chunks);
        assert_eq!(writes[3], vec![0u8; 9600]);
        assert_eq!(harness.observer.energies().len(), 3);
        assert!(!harness.observer.speaking());
    }

    #[tokio::test(start_paused = true)]
    async fn test_microphone_frames_only_sent_while_recording() {
        let frame = vec![10u8, 0, 20, 0];
        let harness = run_script(
            vec![
                Ok(Inbound::Idle),
                event(json!({"type": "response.created"})),
                Ok(Inbound::Idle),
                Ok(Inbound::Idle),
            ],
            vec![frame.clone(); 4],
        )
        .await;
        let sent = harness.transport.sent();
        let appends: Vec<&Value> = sent
            .iter()
            .filter(|v| v["type"] == "input_audio_buffer.append")
            .collect();
        assert_eq!(appends.len(), 2);
        assert_eq!(appends[0]["audio"], encode_base64(&frame));
        assert_eq!(harness.observer.energies().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limits_resume_recording() {
        let shutdown = CancellationToken::new();
        let transport = ScriptedTransport::new(vec![
            event(json!({"type": "response.created"})),
            event(json!({
                "type": "rate_limits.updated",
                "rate_limits": [{"name": "tokens", "limit": 1000, "remaining": 900, "reset_seconds": 1.5}]
            })),
        ])
        .shutdown_when_done(shutdown.clone());
        let observer = Arc::new(RecordingObserver::default());
        let (capture, _) = capture_with(vec![]);
        let mut session = Session::new(
            Arc::new(test_context(observer.clone())),
            Box::new(transport),
            Box::new(capture),
            AudioPlayback::new(Arc::new(RecordingSink::default()), observer),
        );
        session.drive(&shutdown).await.unwrap();
        assert_eq!(session.turn.state(), TurnState::Recording);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recoverable_errors_are_absorbed() {
        let harness = run_script(
            vec![
                event(json!({"type": "error", "error": {"type": "invalid_request_error", "message": "Error committing input audio buffer: buffer is empty."}})),
                event(json!({"type": "error", "error": {"message": "Conversation already has an active response"}})),
                event(json!({"type": "conversation.item.created", "item": {}})),
                Ok(Inbound::Text("not json".to_string())),
            ],
            vec![],
        )
        .await;
        assert!(harness.result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_server_error_ends_session_with_teardown() {
        let harness = run_script(
            vec![event(json!({"type": "error", "error": {"message": "Invalid modalities"}}))],
            vec![],
        )
        .await;
        match harness.result {
            Err(SessionError::Server(message)) => assert_eq!(message, "Invalid modalities"),
            other => panic!("expected server error, got {other:?}"),
        }
        assert_eq!(harness.closes.load(Ordering::SeqCst), 1);
        assert_eq!(harness.transport.close_count(), 1);
        assert!(!harness.observer.active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_event_without_detail_is_fatal() {
        for payload in [
            json!({"type": "error"}),
            json!({"type": "error", "error": {"message": null}}),
            json!({"type": "error", "error": {"message": "boom", "code": 500}}),
        ] {
            let harness = run_script(vec![event(payload.clone())], vec![]).await;
            assert!(
                matches!(harness.result, Err(SessionError::Server(_))),
                "{payload} should end the session"
            );
            assert_eq!(harness.transport.close_count(), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_drops_unfinished_tool_calls() {
        let transport = ScriptedTransport::new(vec![]);
        let observer = Arc::new(RecordingObserver::default());
        let (capture, closes) = capture_with(vec![]);
        let mut session = Session::new(
            Arc::new(test_context(observer.clone())),
            Box::new(transport.clone()),
            Box::new(capture),
            AudioPlayback::new(Arc::new(RecordingSink::default()), observer),
        );

        let added: ServerEvent = serde_json::from_value(json!({
            "type": "response.output_item.added",
            "item": {"type": "function_call", "call_id": "c", "name": "get_current_time"}
        }))
        .unwrap();
        session.handle_event(added).await.unwrap();
        assert_eq!(session.dispatcher.pending_count(), 1);

        session.teardown().await;
        assert_eq!(session.dispatcher.pending_count(), 0);
        assert!(transport.sent().is_empty());
        assert_eq!(transport.close_count(), 1);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_connection_is_an_error() {
        let harness = run_script(
            vec![Ok(Inbound::Closed(Some("keepalive ping timeout".to_string())))],
            vec![],
        )
        .await;
        let err = harness.result.unwrap_err();
        assert!(err.is_transient());

        let harness = run_script(vec![Ok(Inbound::Closed(None))], vec![]).await;
        assert!(!harness.result.unwrap_err().is_transient());
    }

    #[test]
    fn test_only_keepalive_connection_errors_are_transient() {
        use std::time::Duration;
        assert!(
            SessionError::Connection(RealtimeError::KeepaliveTimeout(Duration::from_secs(20)))
                .is_transient()
        );
        assert!(!SessionError::Server("keepalive ping timeout".into()).is_transient());
        assert!(!SessionError::Audio(AudioError::NoDevice("input")).is_transient());
    }
}
