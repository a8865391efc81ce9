//! 编排过程事件：用于流式展示思考、工具调用与回复

use serde::Serialize;

/// 单步过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopEvent {
    /// 第 round 次调用推理网关
    Thinking { round: usize },
    /// 模型请求调用工具
    ToolCall {
        id: String,
        name: String,
        args: serde_json::Value,
    },
    /// 工具返回（预览，避免过长）
    ToolResult {
        id: String,
        name: String,
        is_error: bool,
        preview: String,
    },
    /// 最终回复
    Answer { is_error: bool },
}
