//! 工具结果：有序内容块 + 错误标记
//!
//! 错误时 content 中放人类可读的诊断文本，而不是原始错误对象。

use serde::{Deserialize, Serialize};

/// 内容块（按 type 打标签），目前主要是 text，预留 image / audio
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    /// base64 数据 + MIME 类型
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Audio {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    /// 渲染为纯文本；非文本块用占位符代替，供只接受字符串的后端使用
    pub fn render(&self) -> String {
        match self {
            ContentBlock::Text { text } => text.clone(),
            ContentBlock::Image { mime_type, .. } => format!("[image: {}]", mime_type),
            ContentBlock::Audio { mime_type, .. } => format!("[audio: {}]", mime_type),
        }
    }
}

/// 工具执行结果（序列化字段与 MCP 一致：content / isError）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::text(text)],
            is_error: false,
        }
    }

    pub fn error(diagnostic: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::text(diagnostic)],
            is_error: true,
        }
    }

    pub fn blocks(content: Vec<ContentBlock>) -> Self {
        Self {
            content,
            is_error: false,
        }
    }

    /// 所有块渲染后按换行拼接
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .map(ContentBlock::render)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// ToolResult 的 JSON Schema（工具默认的 result_schema）
pub fn tool_result_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "content": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": { "text": { "type": "string" } },
                    "required": ["text"]
                }
            },
            "isError": { "type": "boolean" }
        },
        "required": ["content", "isError"]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_result_wire_shape() {
        let result = ToolResult::error("查询天气失败");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["isError"], true);
        assert_eq!(json["content"][0]["type"], "text");
        assert_eq!(json["content"][0]["text"], "查询天气失败");
    }

    #[test]
    fn test_text_content_renders_non_text_blocks() {
        let result = ToolResult::blocks(vec![
            ContentBlock::text("caption"),
            ContentBlock::Image {
                data: "aGVsbG8=".to_string(),
                mime_type: "image/png".to_string(),
            },
        ]);
        assert_eq!(result.text_content(), "caption\n[image: image/png]");
        assert!(!result.is_error);
    }

    #[test]
    fn test_missing_is_error_defaults_to_false() {
        let result: ToolResult =
            serde_json::from_str(r#"{"content":[{"type":"text","text":"ok"}]}"#).unwrap();
        assert!(!result.is_error);
        assert_eq!(result.text_content(), "ok");
    }
}
