//! Events sent from the client to the realtime endpoint.

use crate::session::SessionConfig;
use serde::Serialize;

/// Outbound events, serialized with their `type` tag.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Configures the session. Sent once, right after connecting.
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },
    /// Appends base64 PCM16 audio to the input buffer.
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },
    /// Marks the buffered utterance as complete.
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioBufferCommit,
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },
    /// Asks the model for the next response.
    #[serde(rename = "response.create")]
    ResponseCreate,
}

impl ClientEvent {
    /// The wire `type` of this event, used for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientEvent::SessionUpdate { .. } => "session.update",
            ClientEvent::InputAudioBufferAppend { .. } => "input_audio_buffer.append",
            ClientEvent::InputAudioBufferCommit => "input_audio_buffer.commit",
            ClientEvent::ConversationItemCreate { .. } => "conversation.item.create",
            ClientEvent::ResponseCreate => "response.create",
        }
    }

    /// Builds the `function_call_output` item that answers a tool call.
    ///
    /// `output` is the JSON-encoded tool result; the endpoint expects a string.
    pub fn function_call_output(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        ClientEvent::ConversationItemCreate {
            item: ConversationItem::FunctionCallOutput {
                call_id: call_id.into(),
                output: output.into(),
            },
        }
    }
}

/// Conversation items the client creates.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationItem {
    FunctionCallOutput { call_id: String, output: String },
}
