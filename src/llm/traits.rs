//! 推理网关抽象
//!
//! 所有后端（OpenAI 兼容 / Mock / Scripted）实现 InferenceGateway：
//! complete（非流式，可返回工具调用请求）、complete_stream（流式 Token）。
//! 两者合起来就是 complete(messages, tools, streaming) 契约；编排循环对后端不做任何其他假设。

use std::pin::Pin;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::{stream, Stream};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::memory::Message;
use crate::tools::ToolSpec;

/// 流式 Token
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// 网关调用失败（GatewayFailure）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(String),

    /// 服务端返回的错误信息
    #[error("API error: {0}")]
    Api(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Stream error: {0}")]
    Stream(String),
}

/// 网关给出的一次工具调用请求；只在同一轮内被消费一次，不持久化
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// 网关提供的关联 ID
    pub id: String,
    pub name: String,
    pub arguments: Value,
    /// 原始参数不是合法 JSON 时保留原文，该调用直接按错误处理
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub malformed_arguments: Option<String>,
}

impl ToolInvocation {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
            malformed_arguments: None,
        }
    }

    /// 从原始字符串参数解析；空串视为空对象
    pub fn from_raw(id: impl Into<String>, name: impl Into<String>, raw: &str) -> Self {
        let id = id.into();
        let name = name.into();
        if raw.trim().is_empty() {
            return Self::new(id, name, Value::Object(serde_json::Map::new()));
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(arguments) => Self::new(id, name, arguments),
            Err(_) => Self {
                id,
                name,
                arguments: Value::Null,
                malformed_arguments: Some(raw.to_string()),
            },
        }
    }
}

/// Token 统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// 流式调用的 Token 统计；流读完后才有完整数值
#[derive(Debug, Clone, Default)]
pub struct UsageSlot(Arc<Mutex<TokenUsage>>);

impl UsageSlot {
    pub fn new(initial: TokenUsage) -> Self {
        Self(Arc::new(Mutex::new(initial)))
    }

    pub fn add(&self, usage: &TokenUsage) {
        if let Ok(mut total) = self.0.lock() {
            total.add(usage);
        }
    }

    pub fn get(&self) -> TokenUsage {
        self.0.lock().map(|total| *total).unwrap_or_default()
    }
}

/// 非流式完成结果：纯文本，或文本 + 工具调用请求
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub text: String,
    pub tool_calls: Vec<ToolInvocation>,
    pub usage: Option<TokenUsage>,
}

impl Completion {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn tool_calls(tool_calls: Vec<ToolInvocation>) -> Self {
        Self {
            tool_calls,
            ..Self::default()
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// 推理网关 trait
#[async_trait]
pub trait InferenceGateway: Send + Sync {
    /// 非流式完成；tools 为空表示本次不提供工具
    async fn complete(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<Completion, LlmError>;

    /// 流式完成，返回 Token 流；本次调用的用量在流结束前写入 usage
    ///
    /// 默认把 complete 的文本包成单块流
    async fn complete_stream(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
        usage: &UsageSlot,
    ) -> Result<TokenStream, LlmError> {
        let completion = self.complete(messages, tools).await?;
        if let Some(u) = &completion.usage {
            usage.add(u);
        }
        Ok(Box::pin(stream::iter(vec![Ok::<_, LlmError>(completion.text)])))
    }

    /// 后端名称（日志用）
    fn name(&self) -> &str {
        "gateway"
    }
}
