//! 构造期错误类型
//!
//! 运行期的工具失败走 ToolResult 的 is_error 通道，网关失败走 LlmError 并由编排循环折叠为 is_error 回复；
//! 这里只保留会中止启动的错误（缺少必填配置、工具重名等）。

use thiserror::Error;

use crate::llm::LlmError;

/// 组件构造时可能出现的致命错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Config error: {0}")]
    ConfigError(String),

    /// 同一注册表内工具名必须唯一
    #[error("Duplicate tool: {0}")]
    DuplicateTool(String),

    #[error("Gateway error: {0}")]
    Gateway(#[from] LlmError),
}
