//! 工具调用编排循环
//!
//! 一次 run 的状态流转：
//!
//! 1. 组装消息：系统提示（工具清单 + 调用方提示）、历史、用户问题
//! 2. 带全部工具描述调用网关（tool_choice = auto，从不流式）
//! 3. 没有工具请求则直接结束；否则并发执行全部工具调用，按发出顺序追加
//!    assistant(tool_calls) 与每个调用对应的 tool 消息
//! 4. 达到 max_tool_rounds 后的那次调用不再提供工具，可以流式输出
//!
//! 网关失败不重试，直接以 is_error 回复结束；工具失败只影响对应的 tool 消息。

use std::sync::Arc;

use futures_util::{stream, StreamExt};
use tokio::sync::mpsc::UnboundedSender;

use crate::config::AgentSection;
use crate::llm::{InferenceGateway, LlmError, TokenStream, TokenUsage, UsageSlot};
use crate::memory::{Conversation, Message};
use crate::tool_call::events::LoopEvent;
use crate::tool_call::prompt::create_prompt;
use crate::tools::{ToolExecutor, ToolSpec};

const EMPTY_REPLY: &str = "Empty reply from model";

/// 读完的最终回答：空白文本按模型响应异常处理
pub(crate) fn settle_reply(text: String, is_error: bool) -> (String, bool) {
    if !is_error && text.trim().is_empty() {
        tracing::warn!("model returned neither text nor tool calls");
        return (EMPTY_REPLY.to_string(), true);
    }
    (text, is_error)
}

/// 编排参数
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// 默认系统提示后缀；AgentRequest 中的同名字段优先
    pub system_prompt: Option<String>,
    /// 提供工具的网关轮数，默认 1（一次工具轮 + 一次最终回答）
    pub max_tool_rounds: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            system_prompt: None,
            max_tool_rounds: 1,
        }
    }
}

impl From<&AgentSection> for LoopConfig {
    fn from(section: &AgentSection) -> Self {
        Self {
            system_prompt: section.system_prompt.clone(),
            max_tool_rounds: section.max_tool_rounds,
        }
    }
}

/// 一次编排请求
#[derive(Debug, Clone, Default)]
pub struct AgentRequest {
    pub query: String,
    pub system_prompt: Option<String>,
    /// 插在系统提示与用户问题之间的历史消息
    pub history: Vec<Message>,
}

impl AgentRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }
}

/// 非流式回复
#[derive(Debug, Clone)]
pub struct AgentReply {
    pub content: String,
    pub is_error: bool,
    /// 完整消息记录（含最终 assistant 回复）
    pub messages: Vec<Message>,
    pub usage: TokenUsage,
    pub gateway_calls: usize,
    pub tool_invocations: usize,
}

/// 回复正文：完整文本或仍在输出的 Token 流
pub enum ReplyBody {
    Text(String),
    Stream(TokenStream),
}

impl ReplyBody {
    /// 文本也可当作单块流使用
    pub fn into_stream(self) -> TokenStream {
        match self {
            ReplyBody::Text(text) => Box::pin(stream::iter(vec![Ok::<_, LlmError>(text)])),
            ReplyBody::Stream(s) => s,
        }
    }

    /// 读完整个正文
    pub async fn collect(self) -> Result<String, LlmError> {
        match self {
            ReplyBody::Text(text) => Ok(text),
            ReplyBody::Stream(mut s) => {
                let mut out = String::new();
                while let Some(token) = s.next().await {
                    out.push_str(&token?);
                }
                Ok(out)
            }
        }
    }
}

impl std::fmt::Debug for ReplyBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplyBody::Text(text) => f.debug_tuple("Text").field(text).finish(),
            ReplyBody::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// 流式回复；messages 不含最终 assistant 回复（它还在流里）
#[derive(Debug)]
pub struct AgentResponse {
    pub body: ReplyBody,
    pub is_error: bool,
    pub messages: Vec<Message>,
    /// 各轮用量之和；最终调用的用量在正文读完后才计入
    pub usage: UsageSlot,
    pub gateway_calls: usize,
    pub tool_invocations: usize,
}

impl AgentResponse {
    /// 读完正文，转成非流式回复；流中途出错或正文为空时回复标记为 is_error
    pub async fn into_reply(self) -> AgentReply {
        let (content, is_error) = match self.body.collect().await {
            Ok(text) => settle_reply(text, self.is_error),
            Err(e) => {
                tracing::error!(error = %e, "reply stream failed");
                (format!("Inference gateway failed: {}", e), true)
            }
        };
        let mut messages = self.messages;
        if !is_error {
            messages.push(Message::assistant(content.clone()));
        }
        AgentReply {
            content,
            is_error,
            messages,
            usage: self.usage.get(),
            gateway_calls: self.gateway_calls,
            tool_invocations: self.tool_invocations,
        }
    }
}

#[derive(Default)]
struct RunStats {
    usage: TokenUsage,
    gateway_calls: usize,
    tool_invocations: usize,
}

/// 编排循环：持有推理网关与工具执行器
pub struct ToolCallLoop {
    gateway: Arc<dyn InferenceGateway>,
    executor: ToolExecutor,
    config: LoopConfig,
    event_tx: Option<UnboundedSender<LoopEvent>>,
}

impl ToolCallLoop {
    pub fn new(gateway: Arc<dyn InferenceGateway>, executor: ToolExecutor, config: LoopConfig) -> Self {
        Self {
            gateway,
            executor,
            config,
            event_tx: None,
        }
    }

    /// 设置事件推送通道
    pub fn with_event_tx(mut self, tx: UnboundedSender<LoopEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn tools(&self) -> Vec<ToolSpec> {
        self.executor.describe()
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// 非流式执行，返回完整回复
    pub async fn run(&self, request: AgentRequest) -> AgentReply {
        self.drive(request, false).await.into_reply().await
    }

    /// 最终那次网关调用使用流式输出
    pub async fn run_streaming(&self, request: AgentRequest) -> AgentResponse {
        self.drive(request, true).await
    }

    fn send_event(&self, ev: LoopEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(ev);
        }
    }

    async fn drive(&self, request: AgentRequest, streaming: bool) -> AgentResponse {
        let specs = self.executor.describe();
        let suffix = request
            .system_prompt
            .as_deref()
            .or(self.config.system_prompt.as_deref());

        let mut conv = Conversation::new();
        conv.push(Message::system(create_prompt(&specs, suffix)));
        conv.extend(request.history);
        conv.push(Message::user(request.query));

        let mut stats = RunStats::default();
        let mut tool_rounds = 0usize;

        loop {
            let offer_tools = tool_rounds < self.config.max_tool_rounds && !specs.is_empty();
            stats.gateway_calls += 1;
            self.send_event(LoopEvent::Thinking {
                round: stats.gateway_calls,
            });

            if !offer_tools {
                return self.final_call(conv, stats, streaming).await;
            }

            tracing::debug!(round = stats.gateway_calls, tools = specs.len(), "calling gateway with tools");
            let completion = match self.gateway.complete(conv.messages(), &specs).await {
                Ok(c) => c,
                Err(e) => return self.failed(conv, stats, e),
            };
            if let Some(usage) = &completion.usage {
                stats.usage.add(usage);
            }

            if !completion.has_tool_calls() {
                return self.finish_text(conv, stats, completion.text);
            }

            tool_rounds += 1;
            for call in &completion.tool_calls {
                tracing::info!(tool = %call.name, id = %call.id, "model requested tool");
                self.send_event(LoopEvent::ToolCall {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    args: call.arguments.clone(),
                });
            }

            let outcomes = self.executor.execute_all(&completion.tool_calls).await;
            stats.tool_invocations += outcomes.len();

            conv.push(Message::assistant_with_tool_calls(
                completion.text,
                completion.tool_calls,
            ));
            for outcome in outcomes {
                self.send_event(LoopEvent::ToolResult {
                    id: outcome.invocation.id.clone(),
                    name: outcome.invocation.name.clone(),
                    is_error: outcome.result.is_error,
                    preview: preview(&outcome.result.text_content()),
                });
                conv.push(Message::tool(&outcome.invocation, &outcome.result));
            }
        }
    }

    /// 不提供工具的最终调用
    async fn final_call(&self, conv: Conversation, mut stats: RunStats, streaming: bool) -> AgentResponse {
        tracing::debug!(round = stats.gateway_calls, streaming, "calling gateway without tools");
        if streaming {
            let usage = UsageSlot::new(stats.usage);
            return match self.gateway.complete_stream(conv.messages(), &[], &usage).await {
                Ok(tokens) => {
                    self.send_event(LoopEvent::Answer { is_error: false });
                    AgentResponse {
                        body: ReplyBody::Stream(tokens),
                        is_error: false,
                        messages: conv.into_messages(),
                        usage,
                        gateway_calls: stats.gateway_calls,
                        tool_invocations: stats.tool_invocations,
                    }
                }
                Err(e) => self.failed(conv, stats, e),
            };
        }

        match self.gateway.complete(conv.messages(), &[]).await {
            Ok(completion) => {
                if let Some(usage) = &completion.usage {
                    stats.usage.add(usage);
                }
                if completion.has_tool_calls() {
                    tracing::warn!(
                        count = completion.tool_calls.len(),
                        "ignoring tool calls returned after the last tool round"
                    );
                }
                self.finish_text(conv, stats, completion.text)
            }
            Err(e) => self.failed(conv, stats, e),
        }
    }

    fn finish_text(&self, conv: Conversation, stats: RunStats, text: String) -> AgentResponse {
        let (text, is_error) = settle_reply(text, false);
        self.send_event(LoopEvent::Answer { is_error });
        response(ReplyBody::Text(text), is_error, conv, stats)
    }

    fn failed(&self, conv: Conversation, stats: RunStats, err: LlmError) -> AgentResponse {
        tracing::error!(
            gateway = %self.gateway.name(),
            round = stats.gateway_calls,
            error = %err,
            "inference gateway call failed"
        );
        self.send_event(LoopEvent::Answer { is_error: true });
        response(
            ReplyBody::Text(format!("Inference gateway failed: {}", err)),
            true,
            conv,
            stats,
        )
    }
}

fn response(body: ReplyBody, is_error: bool, conv: Conversation, stats: RunStats) -> AgentResponse {
    AgentResponse {
        body,
        is_error,
        messages: conv.into_messages(),
        usage: UsageSlot::new(stats.usage),
        gateway_calls: stats.gateway_calls,
        tool_invocations: stats.tool_invocations,
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() > 120 {
        format!("{}...", text.chars().take(120).collect::<String>())
    } else {
        text.to_string()
    }
}
