//! Assembly and execution of streamed tool calls.
//!
//! The model announces a call with `response.output_item.added`, streams its
//! arguments as text fragments, and closes it with
//! `response.function_call_arguments.done`. [`ToolDispatcher`] keeps one
//! [`PartialToolCall`] per open call id and, on completion, runs the named
//! tool and turns the result into the two events that answer the call.

use crate::registry::ToolRegistry;
use crate::tool::ToolArgs;
use futures::FutureExt;
use openai_realtime_types::ClientEvent;
use serde_json::{Value, json};
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// A tool call whose arguments are still streaming in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: String,
}

/// The resolved outcome of one tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub call_id: String,
    pub tool_name: String,
    /// The tool's result object, or `{"error": ...}`.
    pub result: Value,
    pub elapsed: Duration,
    pub failed: bool,
}

impl ToolOutput {
    /// The `conversation.item.create` carrying the result, then `response.create`.
    pub fn into_events(self) -> [ClientEvent; 2] {
        [
            ClientEvent::function_call_output(self.call_id, self.result.to_string()),
            ClientEvent::ResponseCreate,
        ]
    }
}

/// Parses accumulated argument text. Anything other than a JSON object
/// becomes an empty object.
pub fn parse_arguments(text: &str) -> ToolArgs {
    if text.trim().is_empty() {
        return ToolArgs::new();
    }
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            warn!(arguments = %other, "Tool arguments are not a JSON object, using {{}}.");
            ToolArgs::new()
        }
        Err(e) => {
            warn!(error = %e, arguments = text, "Malformed tool arguments, using {{}}.");
            ToolArgs::new()
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "tool panicked".to_string()
    }
}

pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    pending: HashMap<String, PartialToolCall>,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            pending: HashMap::new(),
        }
    }

    /// Opens a call. Re-announcing an open call id starts it over.
    pub fn begin(&mut self, call_id: impl Into<String>, tool_name: impl Into<String>) {
        let call = PartialToolCall {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            arguments: String::new(),
        };
        debug!(call_id = %call.call_id, tool = %call.tool_name, "Tool call started.");
        if let Some(previous) = self.pending.insert(call.call_id.clone(), call) {
            warn!(call_id = %previous.call_id, "Tool call announced twice, discarding earlier arguments.");
        }
    }

    /// Appends an argument fragment. Returns false, dropping the fragment,
    /// when the call id is not open.
    pub fn append(&mut self, call_id: &str, delta: &str) -> bool {
        match self.pending.get_mut(call_id) {
            Some(call) => {
                call.arguments.push_str(delta);
                true
            }
            None => {
                debug!(call_id, "Argument delta for unknown call id discarded.");
                false
            }
        }
    }

    /// Calls opened but not yet finished.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Closes a call and runs its tool to completion.
    ///
    /// Returns `None` when the call id was never opened.
    pub async fn finish(&mut self, call_id: &str) -> Option<ToolOutput> {
        let Some(call) = self.pending.remove(call_id) else {
            warn!(call_id, "Arguments done for unknown call id.");
            return None;
        };
        let args = parse_arguments(&call.arguments);
        let started = Instant::now();

        let (result, failed) = match self.registry.get(&call.tool_name) {
            None => {
                warn!(tool = %call.tool_name, "Model requested an unregistered tool.");
                (
                    json!({ "error": format!("Function '{}' not found.", call.tool_name) }),
                    true,
                )
            }
            Some(tool) => {
                info!(tool = %call.tool_name, call_id = %call.call_id, "Invoking tool.");
                let outcome = AssertUnwindSafe(tool.invoke(args)).catch_unwind().await;
                let failure = match outcome {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => Err(format!("{e:#}")),
                    Err(payload) => Err(panic_message(payload)),
                };
                match failure {
                    Ok(value) => (value, false),
                    Err(message) => {
                        warn!(tool = %call.tool_name, error = %message, "Tool failed.");
                        (
                            json!({
                                "error": format!("Function '{}' failed: {}", call.tool_name, message)
                            }),
                            true,
                        )
                    }
                }
            }
        };

        Some(ToolOutput {
            call_id: call.call_id,
            tool_name: call.tool_name,
            result,
            elapsed: started.elapsed(),
            failed,
        })
    }

    /// Drops all open calls.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
