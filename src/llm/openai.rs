//! OpenAI 兼容 API 网关
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；支持 OpenAI、DeepSeek、通义等。
//! 提供工具时附带 `tools` + `tool_choice: "auto"`，由模型自行决定是否请求工具；
//! 流式时只输出 delta.content，末尾的 usage 块写入 UsageSlot。

use std::future::Future;
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestToolMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequest,
    CreateChatCompletionRequestArgs, CreateChatCompletionResponse,
    CreateChatCompletionStreamResponse,
};
use async_openai::Client;
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde_json::{json, Value};

use crate::llm::{
    Completion, InferenceGateway, LlmError, TokenStream, TokenUsage, ToolInvocation, UsageSlot,
};
use crate::memory::{Message, Role};
use crate::tools::ToolSpec;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// 网关参数（默认值与原平台一致：temperature 0.7、top_p 0.8、max_tokens 4096）
#[derive(Debug, Clone)]
pub struct OpenAiGatewayConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    /// 单次请求超时（秒）；None 表示不设上限
    pub request_timeout_secs: Option<u64>,
}

impl OpenAiGatewayConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: OPENAI_BASE_URL.to_string(),
            api_key: api_key.into(),
            model: model.into(),
            temperature: Some(0.7),
            top_p: Some(0.8),
            max_tokens: Some(4096),
            request_timeout_secs: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// OpenAI 兼容网关：持有 Client 与参数，调用时把 Message 转为 API 格式
pub struct OpenAiGateway {
    client: Client<OpenAIConfig>,
    config: OpenAiGatewayConfig,
}

impl OpenAiGateway {
    pub fn new(config: OpenAiGatewayConfig) -> Result<Self, LlmError> {
        if config.api_key.trim().is_empty() {
            return Err(LlmError::InvalidRequest("api key is empty".to_string()));
        }
        let openai_config = OpenAIConfig::new()
            .with_api_base(config.base_url.trim_end_matches('/'))
            .with_api_key(config.api_key.clone());
        Ok(Self {
            client: Client::with_config(openai_config),
            config,
        })
    }

    /// 按配置的请求超时等待一次 API 调用
    async fn call<T>(
        &self,
        fut: impl Future<Output = Result<T, OpenAIError>>,
    ) -> Result<T, LlmError> {
        match self.config.request_timeout_secs {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), fut)
                .await
                .map_err(|_| LlmError::Timeout)?
                .map_err(map_openai_error),
            None => fut.await.map_err(map_openai_error),
        }
    }
}

#[async_trait]
impl InferenceGateway for OpenAiGateway {
    async fn complete(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<Completion, LlmError> {
        let request = build_request(&self.config, messages, tools, false)?;
        tracing::debug!(model = %self.config.model, tools = tools.len(), "chat completion");
        let response = self.call(self.client.chat().create(request)).await?;
        parse_response(response)
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
        usage: &UsageSlot,
    ) -> Result<TokenStream, LlmError> {
        let request = build_request(&self.config, messages, tools, true)?;
        tracing::debug!(model = %self.config.model, "chat completion (stream)");
        let chunks = self.call(self.client.chat().create_stream(request)).await?;
        Ok(token_stream(chunks, usage.clone()))
    }

    fn name(&self) -> &str {
        "openai"
    }
}

fn map_openai_error(err: OpenAIError) -> LlmError {
    match err {
        OpenAIError::Reqwest(e) if e.is_timeout() => LlmError::Timeout,
        OpenAIError::Reqwest(e) => LlmError::Http(e.to_string()),
        OpenAIError::ApiError(api) => LlmError::Api(api.message),
        OpenAIError::InvalidArgument(message) => LlmError::InvalidRequest(message),
        other => LlmError::InvalidResponse(other.to_string()),
    }
}

fn invalid_request(err: impl std::fmt::Display) -> LlmError {
    LlmError::InvalidRequest(err.to_string())
}

/// 工具调用的线上格式：`{id, type: "function", function: {name, arguments}}`
fn wire_tool_calls(calls: &[ToolInvocation]) -> Value {
    Value::Array(
        calls
            .iter()
            .map(|tc| {
                json!({
                    "id": tc.id,
                    "type": "function",
                    "function": {
                        "name": tc.name,
                        "arguments": tc
                            .malformed_arguments
                            .clone()
                            .unwrap_or_else(|| tc.arguments.to_string()),
                    }
                })
            })
            .collect(),
    )
}

fn to_openai_message(m: &Message) -> Result<ChatCompletionRequestMessage, LlmError> {
    let text = m.text();
    let message = match m.role {
        Role::System => ChatCompletionRequestMessage::System(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(text)
                .build()
                .map_err(invalid_request)?,
        ),
        Role::User => ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessageArgs::default()
                .content(text)
                .build()
                .map_err(invalid_request)?,
        ),
        Role::Assistant => {
            let mut builder = ChatCompletionRequestAssistantMessageArgs::default();
            // 携带 tool_calls 的 assistant 消息允许 content 为空
            if !text.is_empty() || m.tool_calls.is_empty() {
                builder.content(text);
            }
            let mut assistant = builder.build().map_err(invalid_request)?;
            if !m.tool_calls.is_empty() {
                assistant.tool_calls =
                    Some(serde_json::from_value(wire_tool_calls(&m.tool_calls)).map_err(invalid_request)?);
            }
            ChatCompletionRequestMessage::Assistant(assistant)
        }
        Role::Tool => ChatCompletionRequestMessage::Tool(
            ChatCompletionRequestToolMessageArgs::default()
                .content(text)
                .tool_call_id(m.tool_call_id.clone().unwrap_or_default())
                .build()
                .map_err(invalid_request)?,
        ),
    };
    Ok(message)
}

pub(crate) fn build_request(
    config: &OpenAiGatewayConfig,
    messages: &[Message],
    tools: &[ToolSpec],
    stream: bool,
) -> Result<CreateChatCompletionRequest, LlmError> {
    let messages = messages
        .iter()
        .map(to_openai_message)
        .collect::<Result<Vec<_>, _>>()?;

    let mut request = CreateChatCompletionRequestArgs::default()
        .model(config.model.clone())
        .messages(messages)
        .build()
        .map_err(invalid_request)?;
    request.temperature = config.temperature;
    request.top_p = config.top_p;
    request.max_completion_tokens = config.max_tokens;

    if !tools.is_empty() {
        let functions: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();
        request.tools = Some(serde_json::from_value(Value::Array(functions)).map_err(invalid_request)?);
        request.tool_choice = Some(serde_json::from_value(json!("auto")).map_err(invalid_request)?);
    }
    if stream {
        request.stream = Some(true);
        request.stream_options =
            Some(serde_json::from_value(json!({ "include_usage": true })).map_err(invalid_request)?);
    }
    Ok(request)
}

/// 从响应中的 tool_calls 读取函数调用；非 function 类型的调用跳过
fn invocations_from_wire(calls: &Value) -> Vec<ToolInvocation> {
    calls
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or_default()
        .iter()
        .filter(|call| call.get("type").and_then(Value::as_str).unwrap_or("function") == "function")
        .map(|call| {
            let id = call.get("id").and_then(Value::as_str).unwrap_or_default();
            let name = call
                .pointer("/function/name")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let arguments = call
                .pointer("/function/arguments")
                .and_then(Value::as_str)
                .unwrap_or_default();
            ToolInvocation::from_raw(id, name, arguments)
        })
        .collect()
}

pub(crate) fn parse_response(response: CreateChatCompletionResponse) -> Result<Completion, LlmError> {
    let usage = response.usage.as_ref().map(|u| TokenUsage {
        prompt_tokens: u.prompt_tokens as u64,
        completion_tokens: u.completion_tokens as u64,
        total_tokens: u.total_tokens as u64,
    });
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::InvalidResponse("response did not include choices".to_string()))?;

    let tool_calls = match &choice.message.tool_calls {
        Some(calls) => {
            let wire = serde_json::to_value(calls)
                .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
            invocations_from_wire(&wire)
        }
        None => Vec::new(),
    };
    for call in tool_calls.iter().filter(|c| c.malformed_arguments.is_some()) {
        tracing::warn!(tool = %call.name, id = %call.id, "tool call arguments are not valid JSON");
    }

    Ok(Completion {
        text: choice.message.content.unwrap_or_default(),
        tool_calls,
        usage,
    })
}

/// 流式响应转 Token 流：只保留非空 delta.content，usage 块累加到 slot
pub(crate) fn token_stream<S>(chunks: S, usage: UsageSlot) -> TokenStream
where
    S: Stream<Item = Result<CreateChatCompletionStreamResponse, OpenAIError>> + Send + 'static,
{
    Box::pin(chunks.filter_map(move |chunk| {
        let usage = usage.clone();
        async move {
            match chunk {
                Ok(chunk) => {
                    if let Some(u) = &chunk.usage {
                        usage.add(&TokenUsage {
                            prompt_tokens: u.prompt_tokens as u64,
                            completion_tokens: u.completion_tokens as u64,
                            total_tokens: u.total_tokens as u64,
                        });
                    }
                    let text: String = chunk
                        .choices
                        .iter()
                        .filter_map(|c| c.delta.content.as_deref())
                        .collect();
                    (!text.is_empty()).then_some(Ok(text))
                }
                Err(e) => Some(Err(LlmError::Stream(e.to_string()))),
            }
        }
    }))
}
