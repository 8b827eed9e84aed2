use crate::tool::{Tool, ToolArgs, no_parameters};
use async_trait::async_trait;
use serde_json::{Value, json};

pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Reports the local wall-clock time.
pub struct GetCurrentTime;

#[async_trait]
impl Tool for GetCurrentTime {
    fn name(&self) -> &str {
        "get_current_time"
    }

    fn description(&self) -> &str {
        "Returns the current local date and time."
    }

    fn parameters(&self) -> Value {
        no_parameters()
    }

    async fn invoke(&self, _args: ToolArgs) -> anyhow::Result<Value> {
        let now = chrono::Local::now().format(TIME_FORMAT).to_string();
        Ok(json!({ "current_time": now }))
    }
}
