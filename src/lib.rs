//! Bookroom Agent - 工具调用编排核心
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 构造期错误类型
//! - **llm**: 推理网关抽象与实现（OpenAI 兼容 / Mock / Scripted）
//! - **memory**: 对话消息模型（单次编排内只追加）
//! - **observability**: 日志初始化
//! - **session**: 会话通道（WebSocket / 子进程管道）、会话注册表、服务端与客户端
//! - **tool_call**: 工具调用编排循环、提示词与过程事件
//! - **tools**: 工具 trait、能力注册表、执行器与内置工具

pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod session;
pub mod tool_call;
pub mod tools;

pub use crate::core::AgentError;
pub use tool_call::{AgentReply, AgentRequest, LoopConfig, ToolCallLoop};
pub use tools::{Tool, ToolRegistry, ToolResult};
