//! 工具参数 JSON Schema 生成（schemars）
//!
//! 内置工具用带 `JsonSchema` 的参数结构体描述参数，生成后作为 function parameters 提交给网关。

use schemars::{schema_for, JsonSchema};
use serde_json::Value;

/// 生成参数结构体的 schema，去掉顶层 `$schema` / `title`（OpenAI function parameters 不需要）
pub fn parameters_schema_for<T: JsonSchema>() -> Value {
    let schema = schema_for!(T);
    let mut value = serde_json::to_value(&schema).unwrap_or_else(|_| {
        serde_json::json!({ "type": "object", "properties": {}, "required": [] })
    });
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
        obj.entry("required").or_insert_with(|| Value::Array(Vec::new()));
    }
    value
}
