//! Tool plumbing shared by the assistant service.
//!
//! Tools are registered explicitly into a [`ToolRegistry`] at startup. The
//! session loop feeds streamed call fragments into a [`ToolDispatcher`],
//! which runs the tool and produces the events that answer the call.

pub mod dispatcher;
pub mod registry;
pub mod tool;
pub mod tools;

pub use dispatcher::{PartialToolCall, ToolDispatcher, ToolOutput, parse_arguments};
pub use registry::ToolRegistry;
pub use tool::{Tool, ToolArgs, ToolError, no_parameters, parameters_for, parse_args};
