//! ask 的应答逻辑：服务端与 stdio worker 共用

use futures_util::StreamExt;
use tokio::sync::mpsc;

use crate::session::message::SessionMessage;
use crate::tool_call::loop_::settle_reply;
use crate::tool_call::{AgentRequest, ReplyBody, ToolCallLoop};

/// 回答一个 ask：运行编排循环，逐段输出 chunk，最后输出 answer
///
/// 输出端关闭（对端已断开）时停止。
pub async fn answer_ask(
    agent: &ToolCallLoop,
    request_id: String,
    content: String,
    system_prompt: Option<String>,
    out: &mpsc::UnboundedSender<SessionMessage>,
) {
    let mut request = AgentRequest::new(content);
    request.system_prompt = system_prompt;
    let response = agent.run_streaming(request).await;

    let (text, is_error) = match response.body {
        ReplyBody::Text(text) => (text, response.is_error),
        ReplyBody::Stream(mut tokens) => {
            let mut full = String::new();
            let mut failed = None;
            while let Some(token) = tokens.next().await {
                match token {
                    Ok(token) => {
                        full.push_str(&token);
                        let chunk = SessionMessage::Chunk {
                            request_id: request_id.clone(),
                            content: token,
                        };
                        if out.send(chunk).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        failed = Some(e);
                        break;
                    }
                }
            }
            match failed {
                Some(e) => (format!("Inference gateway failed: {}", e), true),
                None => settle_reply(full, response.is_error),
            }
        }
    };

    let _ = out.send(SessionMessage::Answer {
        request_id,
        content: text,
        is_error,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Completion, LlmError, ScriptedGateway};
    use crate::tool_call::LoopConfig;
    use crate::tools::{ToolExecutor, ToolRegistry};
    use std::sync::Arc;

    fn agent(script: Vec<Result<Completion, LlmError>>) -> ToolCallLoop {
        ToolCallLoop::new(
            Arc::new(ScriptedGateway::new(script)),
            ToolExecutor::new(ToolRegistry::new()),
            LoopConfig::default(),
        )
    }

    async fn collect(agent: &ToolCallLoop, content: &str) -> Vec<SessionMessage> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        answer_ask(agent, "r1".to_string(), content.to_string(), None, &tx).await;
        drop(tx);
        let mut out = Vec::new();
        while let Some(m) = rx.recv().await {
            out.push(m);
        }
        out
    }

    #[tokio::test]
    async fn test_streams_chunks_then_answer() {
        // 没有工具时第一次调用就是最终调用，按流式输出
        let agent = agent(vec![Ok(Completion::text("杭州今天下雨"))]);
        let out = collect(&agent, "杭州天气").await;
        let chunks: String = out
            .iter()
            .filter_map(|m| match m {
                SessionMessage::Chunk { content, .. } => Some(content.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(chunks, "杭州今天下雨");
        assert_eq!(
            out.last(),
            Some(&SessionMessage::Answer {
                request_id: "r1".to_string(),
                content: "杭州今天下雨".to_string(),
                is_error: false
            })
        );
    }

    #[tokio::test]
    async fn test_empty_stream_is_error_answer() {
        let agent = agent(vec![Ok(Completion::text(""))]);
        let out = collect(&agent, "hi").await;
        assert_eq!(out.len(), 1);
        assert!(matches!(&out[0], SessionMessage::Answer { is_error: true, .. }));
    }

    #[tokio::test]
    async fn test_gateway_failure_is_error_answer() {
        let agent = agent(vec![Err(LlmError::Timeout)]);
        let out = collect(&agent, "hi").await;
        assert_eq!(out.len(), 1);
        assert!(matches!(&out[0], SessionMessage::Answer { is_error: true, .. }));
    }
}
