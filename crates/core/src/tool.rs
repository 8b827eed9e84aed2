//! The uniform contract every locally executed tool implements.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Arguments passed to a tool: always a JSON object, possibly empty.
pub type ToolArgs = Map<String, Value>;

/// A function the remote model can ask the assistant to run.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name used in `function_call` items.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the arguments object.
    fn parameters(&self) -> Value;

    /// Runs the tool. The returned object is serialized as the call output.
    async fn invoke(&self, args: ToolArgs) -> anyhow::Result<Value>;
}

/// Errors raised by the built-in tools.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(#[from] serde_json::Error),
    #[error("invalid file name '{0}': must be a plain name inside the scratch pad")]
    InvalidFileName(String),
}

/// Schema for an argument struct, without the `$schema` and `title` keys the
/// endpoint does not accept.
pub fn parameters_for<T: JsonSchema>() -> Value {
    let mut value = schemars::schema_for!(T).to_value();
    if let Some(object) = value.as_object_mut() {
        object.remove("$schema");
        object.remove("title");
    }
    value
}

/// Schema for tools that take no arguments.
pub fn no_parameters() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

/// Deserializes the arguments object into a typed struct.
pub fn parse_args<T: DeserializeOwned>(args: ToolArgs) -> Result<T, ToolError> {
    Ok(serde_json::from_value(Value::Object(args))?)
}
