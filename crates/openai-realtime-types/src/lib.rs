//! Wire types for the OpenAI Realtime API.
//!
//! Every event exchanged with the realtime endpoint is a JSON object tagged by
//! its `type` field. Outbound events live in [`client`], inbound events in
//! [`server`], and the `session.update` payload in [`session`].

pub mod client;
pub mod server;
pub mod session;

pub use client::{ClientEvent, ConversationItem};
pub use server::{ErrorDetail, OutputItem, RateLimit, ServerEvent};
pub use session::{
    AudioFormat, Modality, SessionConfig, ToolDefinition, TurnDetection, UnknownVoice, Voice,
};
