//! 无需 API 的网关实现
//!
//! - MockGateway：离线演示用；用户消息里出现某个工具名就请求该工具，拿到工具结果后汇总回复
//! - ScriptedGateway：测试用；按顺序回放预置的完成结果，并记录每次调用的消息与工具

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use serde_json::{Map, Value};

use crate::llm::{Completion, InferenceGateway, LlmError, TokenStream, ToolInvocation, UsageSlot};
use crate::memory::{Message, Role};
use crate::tools::ToolSpec;

/// Mock 网关：回显用户消息，或按工具名触发一次工具调用
#[derive(Debug, Default)]
pub struct MockGateway;

impl MockGateway {
    fn summarize_tool_results(messages: &[Message]) -> String {
        let mut results: Vec<String> = messages
            .iter()
            .rev()
            .take_while(|m| m.role == Role::Tool)
            .map(|m| format!("{}: {}", m.name.as_deref().unwrap_or("tool"), m.text()))
            .collect();
        results.reverse();
        format!("Based on tool results:\n{}", results.join("\n"))
    }

    fn arguments_for(spec: &ToolSpec, user_text: &str) -> Value {
        let mut args = Map::new();
        let required = spec
            .parameters
            .get("required")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for field in required.iter().filter_map(Value::as_str) {
            let is_string = spec
                .parameters
                .pointer(&format!("/properties/{}/type", field))
                .and_then(Value::as_str)
                .map_or(true, |t| t == "string");
            if is_string {
                args.insert(field.to_string(), Value::String(user_text.to_string()));
            }
        }
        Value::Object(args)
    }
}

#[async_trait]
impl InferenceGateway for MockGateway {
    async fn complete(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<Completion, LlmError> {
        if messages.last().map(|m| m.role) == Some(Role::Tool) {
            return Ok(Completion::text(Self::summarize_tool_results(messages)));
        }

        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.text())
            .unwrap_or_else(|| "(no input)".to_string());

        let lowered = last_user.to_lowercase();
        if let Some(spec) = tools.iter().find(|t| lowered.contains(&t.name.to_lowercase())) {
            let invocation = ToolInvocation::new(
                "mock_call_1",
                spec.name.clone(),
                Self::arguments_for(spec, &last_user),
            );
            return Ok(Completion::tool_calls(vec![invocation]));
        }

        Ok(Completion::text(format!("Echo from Mock: {}", last_user)))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// 一次网关调用的记录
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
    pub streaming: bool,
}

/// 脚本网关：按顺序返回预置结果；脚本耗尽后返回 InvalidResponse
#[derive(Debug, Default)]
pub struct ScriptedGateway {
    script: Mutex<VecDeque<Result<Completion, LlmError>>>,
    calls: AtomicUsize,
    recorded: Mutex<Vec<RecordedCall>>,
}

impl ScriptedGateway {
    pub fn new(script: Vec<Result<Completion, LlmError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
            recorded: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn recorded(&self) -> Vec<RecordedCall> {
        self.recorded.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn next(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
        streaming: bool,
    ) -> Result<Completion, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut recorded) = self.recorded.lock() {
            recorded.push(RecordedCall {
                messages: messages.to_vec(),
                tools: tools.to_vec(),
                streaming,
            });
        }
        self.script
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .unwrap_or_else(|| Err(LlmError::InvalidResponse("script exhausted".to_string())))
    }
}

#[async_trait]
impl InferenceGateway for ScriptedGateway {
    async fn complete(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<Completion, LlmError> {
        self.next(messages, tools, false)
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
        usage: &UsageSlot,
    ) -> Result<TokenStream, LlmError> {
        let completion = self.next(messages, tools, true)?;
        let chars: Vec<char> = completion.text.chars().collect();
        let chunks: Vec<Result<String, LlmError>> = chars
            .chunks(4)
            .map(|c| Ok(c.iter().collect::<String>()))
            .collect();
        // 与真实流一致：用量在最后一块之后才写入
        let usage = usage.clone();
        let total = completion.usage;
        let tail = stream::once(async move {
            if let Some(u) = &total {
                usage.add(u);
            }
        })
        .filter_map(|()| async { None::<Result<String, LlmError>> });
        Ok(Box::pin(stream::iter(chunks).chain(tail)))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn weather_spec() -> ToolSpec {
        ToolSpec {
            name: "weather_tool".to_string(),
            version: "1.0".to_string(),
            description: "weather".to_string(),
            parameters: json!({
                "type": "object",
                "properties": { "query": { "type": "string" } },
                "required": ["query"]
            }),
            returns: None,
        }
    }

    #[tokio::test]
    async fn test_mock_requests_named_tool() {
        let gateway = MockGateway;
        let messages = vec![Message::user("use weather_tool for Hangzhou")];
        let completion = gateway.complete(&messages, &[weather_spec()]).await.unwrap();
        assert_eq!(completion.tool_calls.len(), 1);
        assert_eq!(completion.tool_calls[0].name, "weather_tool");
        assert_eq!(
            completion.tool_calls[0].arguments,
            json!({"query": "use weather_tool for Hangzhou"})
        );
    }

    #[tokio::test]
    async fn test_mock_echoes_without_tools() {
        let gateway = MockGateway;
        let completion = gateway.complete(&[Message::user("你好")], &[]).await.unwrap();
        assert_eq!(completion.text, "Echo from Mock: 你好");
        assert!(!completion.has_tool_calls());
    }

    #[tokio::test]
    async fn test_scripted_exhaustion_is_error() {
        let gateway = ScriptedGateway::new(vec![Ok(Completion::text("one"))]);
        assert!(gateway.complete(&[], &[]).await.is_ok());
        assert!(gateway.complete(&[], &[]).await.is_err());
        assert_eq!(gateway.call_count(), 2);
    }
}
