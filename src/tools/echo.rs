//! Echo 工具（测试用）

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::tools::schema::parameters_schema_for;
use crate::tools::{Tool, ToolResult};

#[derive(Deserialize, JsonSchema)]
struct EchoArgs {
    /// 要回显的文本
    text: String,
}

/// Echo 工具：回显文本
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo text back (for testing)"
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema_for::<EchoArgs>()
    }

    async fn execute(&self, args: Value) -> ToolResult {
        match serde_json::from_value::<EchoArgs>(args) {
            Ok(args) => ToolResult::text(args.text),
            Err(e) => ToolResult::error(format!("echo: {}", e)),
        }
    }
}
