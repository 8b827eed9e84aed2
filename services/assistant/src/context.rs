//! State shared by every connection attempt.

use crate::config::Config;
use crate::observer::ActivityObserver;
use crate::runtime_log::RuntimeLog;
use assistant_core::ToolRegistry;
use openai_realtime::types::{
    AudioFormat, ClientEvent, Modality, SessionConfig, TurnDetection, Voice,
};
use std::sync::Arc;
use std::time::Duration;

/// How long one loop iteration waits for an inbound event.
pub const DEFAULT_TICK: Duration = Duration::from_millis(10);

/// Server-side voice activity detection parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadSettings {
    pub threshold: f32,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 400,
        }
    }
}

/// What the session declares in `session.update`.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub voice: Voice,
    pub instructions: String,
    pub vad: VadSettings,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            voice: config.voice,
            instructions: config.instructions.clone(),
            vad: VadSettings {
                threshold: config.silence_threshold,
                prefix_padding_ms: config.prefix_padding_ms,
                silence_duration_ms: config.silence_duration_ms,
            },
        }
    }
}

/// Built once at startup and handed to every session.
pub struct SessionContext {
    pub settings: SessionSettings,
    pub tools: Arc<ToolRegistry>,
    pub observer: Arc<dyn ActivityObserver>,
    pub runtime_log: RuntimeLog,
    pub tick: Duration,
}

impl SessionContext {
    pub fn new(
        settings: SessionSettings,
        tools: Arc<ToolRegistry>,
        observer: Arc<dyn ActivityObserver>,
        runtime_log: RuntimeLog,
    ) -> Self {
        Self {
            settings,
            tools,
            observer,
            runtime_log,
            tick: DEFAULT_TICK,
        }
    }

    /// The configuration event sent right after connecting.
    pub fn session_update(&self) -> ClientEvent {
        let vad = self.settings.vad;
        ClientEvent::SessionUpdate {
            session: SessionConfig {
                modalities: vec![Modality::Text, Modality::Audio],
                instructions: self.settings.instructions.clone(),
                voice: self.settings.voice,
                input_audio_format: AudioFormat::Pcm16,
                output_audio_format: AudioFormat::Pcm16,
                turn_detection: TurnDetection::ServerVad {
                    threshold: vad.threshold,
                    prefix_padding_ms: vad.prefix_padding_ms,
                    silence_duration_ms: vad.silence_duration_ms,
                },
                tools: self.tools.definitions(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::EnergyMeter;
    use assistant_core::tools::{GetCurrentTime, GetRandomNumber};
    use serde_json::json;

    #[test]
    fn test_session_update_payload() {
        let mut registry = ToolRegistry::new();
        registry.register(GetCurrentTime);
        registry.register(GetRandomNumber);
        let context = SessionContext::new(
            SessionSettings {
                voice: Voice::Shimmer,
                instructions: "Be brief.".to_string(),
                vad: VadSettings::default(),
            },
            Arc::new(registry),
            Arc::new(EnergyMeter::new()),
            RuntimeLog::disabled(),
        );

        let value = serde_json::to_value(context.session_update()).unwrap();
        assert_eq!(value["type"], "session.update");
        let session = &value["session"];
        assert_eq!(session["modalities"], json!(["text", "audio"]));
        assert_eq!(session["instructions"], "Be brief.");
        assert_eq!(session["voice"], "shimmer");
        assert_eq!(session["input_audio_format"], "pcm16");
        assert_eq!(session["output_audio_format"], "pcm16");
        assert_eq!(
            session["turn_detection"],
            json!({
                "type": "server_vad",
                "threshold": 0.5,
                "prefix_padding_ms": 300,
                "silence_duration_ms": 400
            })
        );
        let tools = session["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0]["type"], "function");
        assert_eq!(tools[0]["name"], "get_current_time");
        assert_eq!(tools[1]["name"], "get_random_number");
    }
}
