use crate::tool::{Tool, ToolArgs, no_parameters};
use async_trait::async_trait;
use rand::Rng;
use serde_json::{Value, json};

/// Draws a number between 1 and 100 inclusive.
pub struct GetRandomNumber;

#[async_trait]
impl Tool for GetRandomNumber {
    fn name(&self) -> &str {
        "get_random_number"
    }

    fn description(&self) -> &str {
        "Returns a random number between 1 and 100."
    }

    fn parameters(&self) -> Value {
        no_parameters()
    }

    async fn invoke(&self, _args: ToolArgs) -> anyhow::Result<Value> {
        let number: u32 = rand::rng().random_range(1..=100);
        Ok(json!({ "random_number": number }))
    }
}
