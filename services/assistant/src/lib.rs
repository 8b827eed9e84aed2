//! Voice assistant over the OpenAI realtime API.
//!
//! Microphone audio streams to the server, spoken replies stream back to the
//! speaker, and function calls requested by the model are run locally.

pub mod audio;
pub mod config;
pub mod context;
pub mod observer;
pub mod runtime_log;
pub mod session;
pub mod supervisor;
pub mod turn;

#[cfg(test)]
pub(crate) mod testing;
