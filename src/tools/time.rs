//! 当前时间工具

use async_trait::async_trait;
use chrono::Local;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::tools::registry::compose_description;
use crate::tools::schema::parameters_schema_for;
use crate::tools::{Tool, ToolResult};

const BASE_DESCRIPTION: &str = "API for current time | 查询当前时间接口";

#[allow(dead_code)]
#[derive(Deserialize, JsonSchema)]
struct TimeArgs {
    /// 用户的时间相关问题
    query: String,
}

/// time_tool：按 chrono 格式串返回本地当前时间
pub struct TimeTool {
    description: String,
    format: String,
}

impl TimeTool {
    pub fn new(format: impl Into<String>, description_suffix: Option<&str>) -> Self {
        Self {
            description: compose_description(BASE_DESCRIPTION, description_suffix),
            format: format.into(),
        }
    }
}

impl Default for TimeTool {
    fn default() -> Self {
        Self::new("%Y-%m-%d %H:%M:%S %A %:z", None)
    }
}

#[async_trait]
impl Tool for TimeTool {
    fn name(&self) -> &str {
        "time_tool"
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema_for::<TimeArgs>()
    }

    async fn execute(&self, _args: Value) -> ToolResult {
        use std::fmt::Write;

        let mut out = String::new();
        // 非法格式串时 chrono 在 Display 中返回 fmt::Error
        if write!(out, "{}", Local::now().format(&self.format)).is_err() {
            return ToolResult::error(format!("invalid time format: {}", self.format));
        }
        ToolResult::text(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_description_suffix() {
        let tool = TimeTool::new("%Y", Some("北京时间"));
        assert_eq!(tool.description(), "API for current time | 查询当前时间接口 | 北京时间");
        assert_eq!(TimeTool::default().description(), BASE_DESCRIPTION);
    }

    #[tokio::test]
    async fn test_formats_current_year() {
        let tool = TimeTool::new("%Y", None);
        let result = tool.execute(json!({"query": "今年是哪一年"})).await;
        assert!(!result.is_error);
        assert_eq!(result.text_content(), Local::now().format("%Y").to_string());
    }

    #[test]
    fn test_query_is_required() {
        let schema = TimeTool::default().parameters_schema();
        assert_eq!(schema["required"], json!(["query"]));
    }
}
