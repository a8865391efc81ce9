//! 能力注册表
//!
//! 所有工具实现 Tool trait（name / version / description / parameters_schema / execute），
//! 由 ToolRegistry 按注册顺序保存；同名工具拒绝注册（返回 AgentError::DuplicateTool）。
//! invoke 永远返回 ToolResult：未知工具、参数不合法、执行 panic 都折叠为 is_error 结果，
//! 单个坏调用不会中断同一轮里的其他调用。

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::AgentError;
use crate::tools::result::{tool_result_schema, ToolResult};

/// 工具 trait：名称、版本、描述（供 LLM 理解）、参数 schema、异步执行（args 为 JSON）
///
/// execute 不返回 Result：实现方自行捕获失败并返回 `ToolResult::error`。
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（注册表内唯一，作为函数名暴露给模型）
    fn name(&self) -> &str;

    fn version(&self) -> &str {
        "1.0"
    }

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认无参数
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 返回值 schema，仅作提示
    fn result_schema(&self) -> Value {
        tool_result_schema()
    }

    async fn execute(&self, args: Value) -> ToolResult;
}

/// 工具描述快照：写入提示词、并作为可调用函数提交给推理网关
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub version: String,
    pub description: String,
    pub parameters: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns: Option<Value>,
}

impl ToolSpec {
    pub fn from_tool(tool: &dyn Tool) -> Self {
        Self {
            name: tool.name().to_string(),
            version: tool.version().to_string(),
            description: tool.description().to_string(),
            parameters: tool.parameters_schema(),
            returns: Some(tool.result_schema()),
        }
    }
}

/// 基础描述 + 调用方补充描述，以 " | " 连接
pub fn compose_description(base: &str, suffix: Option<&str>) -> String {
    match suffix.map(str::trim) {
        Some(s) if !s.is_empty() => format!("{} | {}", base, s),
        _ => base.to_string(),
    }
}

/// 能力注册表：按插入顺序存储 Arc<dyn Tool>
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), AgentError> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<(), AgentError> {
        let name = tool.name().to_string();
        if self.index.contains_key(&name) {
            return Err(AgentError::DuplicateTool(name));
        }
        self.index.insert(name, self.tools.len());
        self.tools.push(tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.index.get(name).map(|&i| Arc::clone(&self.tools[i]))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    /// 全部工具描述（注册顺序）
    pub fn describe(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|t| ToolSpec::from_tool(t.as_ref())).collect()
    }

    /// 查找并执行；任何失败都转成 is_error 结果
    pub async fn invoke(&self, name: &str, args: Value) -> ToolResult {
        match self.get(name) {
            Some(tool) => invoke_tool(tool, args).await,
            None => {
                tracing::warn!(tool = %name, "unknown tool requested");
                ToolResult::error(format!("No such tool: {}", name))
            }
        }
    }
}

/// 校验参数后执行单个工具，execute 内的 panic 被捕获
pub(crate) async fn invoke_tool(tool: Arc<dyn Tool>, args: Value) -> ToolResult {
    let args = if args.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        args
    };
    if let Err(reason) = validate_arguments(&tool.parameters_schema(), &args) {
        return ToolResult::error(format!(
            "Invalid arguments for tool {}: {}",
            tool.name(),
            reason
        ));
    }
    match AssertUnwindSafe(tool.execute(args)).catch_unwind().await {
        Ok(result) => result,
        Err(_) => {
            tracing::error!(tool = %tool.name(), "tool panicked");
            ToolResult::error(format!("Tool {} failed unexpectedly", tool.name()))
        }
    }
}

/// 按 schema 做浅层校验：必须是对象、required 字段齐全、已声明字段的基本类型匹配
pub fn validate_arguments(schema: &Value, args: &Value) -> Result<(), String> {
    let obj = args
        .as_object()
        .ok_or_else(|| "arguments must be a JSON object".to_string())?;

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for field in required.iter().filter_map(Value::as_str) {
            if !obj.contains_key(field) {
                return Err(format!("missing required argument `{}`", field));
            }
        }
    }

    if let Some(props) = schema.get("properties").and_then(Value::as_object) {
        for (key, value) in obj {
            let expected = props
                .get(key)
                .and_then(|p| p.get("type"))
                .and_then(Value::as_str);
            if let Some(expected) = expected {
                if !type_matches(expected, value) {
                    return Err(format!("argument `{}` should be of type {}", key, expected));
                }
            }
        }
    }

    Ok(())
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Named(&'static str);

    #[async_trait]
    impl Tool for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn description(&self) -> &str {
            "named test tool"
        }

        async fn execute(&self, _args: Value) -> ToolResult {
            ToolResult::text(self.0)
        }
    }

    struct NeedsCity;

    #[async_trait]
    impl Tool for NeedsCity {
        fn name(&self) -> &str {
            "weather_tool"
        }

        fn description(&self) -> &str {
            "Get weather information"
        }

        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": { "city": { "type": "string" } },
                "required": ["city"]
            })
        }

        async fn execute(&self, args: Value) -> ToolResult {
            ToolResult::text(format!("sunny in {}", args["city"].as_str().unwrap_or("?")))
        }
    }

    struct Panics;

    #[async_trait]
    impl Tool for Panics {
        fn name(&self) -> &str {
            "panics"
        }

        fn description(&self) -> &str {
            "always panics"
        }

        async fn execute(&self, _args: Value) -> ToolResult {
            panic!("boom")
        }
    }

    #[test]
    fn test_describe_keeps_insertion_order() {
        let mut registry = ToolRegistry::new();
        registry.register(Named("zeta")).unwrap();
        registry.register(Named("alpha")).unwrap();
        registry.register(Named("mid")).unwrap();
        let names: Vec<String> = registry.describe().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut registry = ToolRegistry::new();
        registry.register(Named("echo")).unwrap();
        let err = registry.register(Named("echo")).unwrap_err();
        assert!(matches!(err, AgentError::DuplicateTool(name) if name == "echo"));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_error_result() {
        let registry = ToolRegistry::new();
        let result = registry.invoke("missing", json!({})).await;
        assert!(result.is_error);
        assert!(result.text_content().contains("missing"));
    }

    #[tokio::test]
    async fn test_missing_required_argument() {
        let mut registry = ToolRegistry::new();
        registry.register(NeedsCity).unwrap();
        let result = registry.invoke("weather_tool", json!({})).await;
        assert!(result.is_error);
        assert!(result.text_content().contains("city"));

        let ok = registry.invoke("weather_tool", json!({"city": "Hangzhou"})).await;
        assert!(!ok.is_error);
        assert_eq!(ok.text_content(), "sunny in Hangzhou");
    }

    #[tokio::test]
    async fn test_wrong_argument_type() {
        let mut registry = ToolRegistry::new();
        registry.register(NeedsCity).unwrap();
        let result = registry.invoke("weather_tool", json!({"city": 42})).await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn test_panic_becomes_error_result() {
        let mut registry = ToolRegistry::new();
        registry.register(Panics).unwrap();
        let result = registry.invoke("panics", Value::Null).await;
        assert!(result.is_error);
    }

    #[test]
    fn test_compose_description() {
        assert_eq!(compose_description("Time", None), "Time");
        assert_eq!(compose_description("Time", Some("  ")), "Time");
        assert_eq!(compose_description("Time", Some("北京时间")), "Time | 北京时间");
    }
}
