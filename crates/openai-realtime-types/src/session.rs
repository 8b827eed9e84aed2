//! The `session` object carried by `session.update`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Output modalities the model may produce.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Audio,
}

/// Audio encodings accepted by the endpoint. Only PCM16 is used here.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioFormat {
    #[default]
    #[serde(rename = "pcm16")]
    Pcm16,
    #[serde(rename = "g711_ulaw")]
    G711Ulaw,
    #[serde(rename = "g711_alaw")]
    G711Alaw,
}

/// Built-in voices of the realtime models.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Voice {
    #[default]
    Alloy,
    Ash,
    Ballad,
    Coral,
    Echo,
    Sage,
    Shimmer,
    Verse,
}

impl Voice {
    pub fn as_str(&self) -> &'static str {
        match self {
            Voice::Alloy => "alloy",
            Voice::Ash => "ash",
            Voice::Ballad => "ballad",
            Voice::Coral => "coral",
            Voice::Echo => "echo",
            Voice::Sage => "sage",
            Voice::Shimmer => "shimmer",
            Voice::Verse => "verse",
        }
    }
}

impl fmt::Display for Voice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown voice '{0}'")]
pub struct UnknownVoice(pub String);

impl FromStr for Voice {
    type Err = UnknownVoice;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "alloy" => Ok(Voice::Alloy),
            "ash" => Ok(Voice::Ash),
            "ballad" => Ok(Voice::Ballad),
            "coral" => Ok(Voice::Coral),
            "echo" => Ok(Voice::Echo),
            "sage" => Ok(Voice::Sage),
            "shimmer" => Ok(Voice::Shimmer),
            "verse" => Ok(Voice::Verse),
            _ => Err(UnknownVoice(s.to_string())),
        }
    }
}

/// Turn detection strategy. The client relies on server-side VAD.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnDetection {
    ServerVad {
        /// Activation threshold in `0.0..=1.0`.
        threshold: f32,
        /// Audio kept before detected speech, in milliseconds.
        prefix_padding_ms: u32,
        /// Silence required to end a turn, in milliseconds.
        silence_duration_ms: u32,
    },
}

/// A function the model may call, as advertised in `session.tools`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            kind: "function".to_string(),
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Session configuration sent once per connection.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub modalities: Vec<Modality>,
    pub instructions: String,
    pub voice: Voice,
    pub input_audio_format: AudioFormat,
    pub output_audio_format: AudioFormat,
    pub turn_detection: TurnDetection,
    pub tools: Vec<ToolDefinition>,
}
