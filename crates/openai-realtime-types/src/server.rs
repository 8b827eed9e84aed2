//! Events received from the realtime endpoint.
//!
//! Only the events the assistant reacts to are modelled; every other `type`
//! decodes to [`ServerEvent::Unknown`] so new server events never break the
//! receive loop.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session.created")]
    SessionCreated {
        #[serde(default)]
        session: Value,
    },
    #[serde(rename = "session.updated")]
    SessionUpdated {
        #[serde(default)]
        session: Value,
    },
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        audio_start_ms: Option<u64>,
        item_id: Option<String>,
    },
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped {
        audio_end_ms: Option<u64>,
        item_id: Option<String>,
    },
    #[serde(rename = "response.created")]
    ResponseCreated {
        #[serde(default)]
        response: Value,
    },
    #[serde(rename = "response.output_item.added")]
    OutputItemAdded { item: OutputItem },
    #[serde(rename = "response.function_call_arguments.delta")]
    FunctionCallArgumentsDelta {
        #[serde(default)]
        call_id: String,
        #[serde(default)]
        delta: String,
    },
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        #[serde(default)]
        call_id: String,
        arguments: Option<String>,
    },
    #[serde(rename = "response.text.delta")]
    TextDelta {
        #[serde(default)]
        delta: String,
    },
    #[serde(rename = "response.audio_transcript.delta")]
    AudioTranscriptDelta {
        #[serde(default)]
        delta: String,
    },
    /// A chunk of base64 PCM16 audio.
    #[serde(rename = "response.audio.delta")]
    AudioDelta { delta: String },
    #[serde(rename = "response.done")]
    ResponseDone {
        #[serde(default)]
        response: Value,
    },
    #[serde(rename = "rate_limits.updated")]
    RateLimitsUpdated {
        #[serde(default)]
        rate_limits: Vec<RateLimit>,
    },
    /// Decodes whatever shape the payload has, so every `error` event
    /// reaches the session as an error.
    #[serde(rename = "error")]
    Error {
        #[serde(default, deserialize_with = "lenient_detail")]
        error: ErrorDetail,
    },
    #[serde(other)]
    Unknown,
}

impl ServerEvent {
    /// The wire `type` of this event, used for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::SessionCreated { .. } => "session.created",
            ServerEvent::SessionUpdated { .. } => "session.updated",
            ServerEvent::SpeechStarted { .. } => "input_audio_buffer.speech_started",
            ServerEvent::SpeechStopped { .. } => "input_audio_buffer.speech_stopped",
            ServerEvent::ResponseCreated { .. } => "response.created",
            ServerEvent::OutputItemAdded { .. } => "response.output_item.added",
            ServerEvent::FunctionCallArgumentsDelta { .. } => {
                "response.function_call_arguments.delta"
            }
            ServerEvent::FunctionCallArgumentsDone { .. } => "response.function_call_arguments.done",
            ServerEvent::TextDelta { .. } => "response.text.delta",
            ServerEvent::AudioTranscriptDelta { .. } => "response.audio_transcript.delta",
            ServerEvent::AudioDelta { .. } => "response.audio.delta",
            ServerEvent::ResponseDone { .. } => "response.done",
            ServerEvent::RateLimitsUpdated { .. } => "rate_limits.updated",
            ServerEvent::Error { .. } => "error",
            ServerEvent::Unknown => "unknown",
        }
    }
}

/// The item announced by `response.output_item.added`.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputItem {
    FunctionCall {
        id: Option<String>,
        call_id: String,
        name: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct RateLimit {
    pub name: String,
    pub limit: Option<f64>,
    pub remaining: Option<f64>,
    pub reset_seconds: Option<f64>,
}

/// Payload of an `error` event.
///
/// Fields of unexpected types are kept as their JSON text, and a missing or
/// null message decodes as empty.
#[derive(Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ErrorDetail {
    #[serde(rename = "type", default, deserialize_with = "lenient_string")]
    pub kind: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub code: Option<String>,
    #[serde(default, deserialize_with = "lenient_message")]
    pub message: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub param: Option<String>,
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

fn lenient_message<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_string(deserializer)?.unwrap_or_default())
}

fn lenient_detail<'de, D>(deserializer: D) -> Result<ErrorDetail, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        Some(value @ Value::Object(_)) => {
            ErrorDetail::deserialize(value).map_err(serde::de::Error::custom)
        }
        Some(Value::String(message)) => Ok(ErrorDetail {
            message,
            ..Default::default()
        }),
        _ => Ok(ErrorDetail::default()),
    }
}
