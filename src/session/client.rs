//! 会话客户端：经注册表里的通道发送 ask，并按 request_id 关联 answer
//!
//! 建立通道的 transport 需要把收件箱设为 `client.inbox()`，客户端才能收到回复。
//! 会话被注册表移除时，该会话上所有未完成的 ask 立即以 Closed 结束。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};

use crate::session::channel::{InboxReceiver, InboxSender, Inbound, TransportError};
use crate::session::message::SessionMessage;
use crate::session::registry::SessionRegistry;

/// 对端的最终回答
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAnswer {
    pub content: String,
    pub is_error: bool,
}

/// 等待回答的 ask
struct Waiter {
    session_id: String,
    tx: oneshot::Sender<RemoteAnswer>,
}

/// request_id → 等待者
type Pending = Arc<Mutex<HashMap<String, Waiter>>>;

/// 会话客户端
pub struct SessionClient {
    registry: SessionRegistry,
    inbox: InboxSender,
    pending: Pending,
}

impl SessionClient {
    /// 新建客户端（自带一个空注册表）；需在 tokio 运行时内调用
    pub fn new() -> Self {
        Self::with_registry(SessionRegistry::new())
    }

    pub fn with_registry(registry: SessionRegistry) -> Self {
        let (inbox, rx) = mpsc::unbounded_channel();
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let removed = registry.subscribe_removed();
        tokio::spawn(pump(rx, removed, registry.clone(), Arc::clone(&pending)));
        Self {
            registry,
            inbox,
            pending,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// 交给 transport 的收件箱
    pub fn inbox(&self) -> InboxSender {
        self.inbox.clone()
    }

    /// 发送 ask 并等待 answer
    ///
    /// 会话不存在、发送失败或等待期间会话被移除返回 Closed；超时前没有收到 answer 返回 Io(TimedOut)。
    pub async fn ask(
        &self,
        session_id: &str,
        content: impl Into<String>,
        system_prompt: Option<String>,
        timeout: Duration,
    ) -> Result<RemoteAnswer, TransportError> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(
            request_id.clone(),
            Waiter {
                session_id: session_id.to_string(),
                tx,
            },
        );

        let message = SessionMessage::Ask {
            request_id: request_id.clone(),
            content: content.into(),
            system_prompt,
        };
        if !self.registry.send(session_id, message).await {
            self.pending.lock().await.remove(&request_id);
            return Err(TransportError::Closed);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(answer)) => Ok(answer),
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => {
                self.pending.lock().await.remove(&request_id);
                tracing::warn!(session = %session_id, request = %request_id, "remote answer timed out");
                Err(TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("no answer within {}s", timeout.as_secs()),
                )))
            }
        }
    }
}

impl Default for SessionClient {
    fn default() -> Self {
        Self::new()
    }
}

async fn pump(
    mut inbox: InboxReceiver,
    mut removed: broadcast::Receiver<String>,
    registry: SessionRegistry,
    pending: Pending,
) {
    loop {
        tokio::select! {
            inbound = inbox.recv() => match inbound {
                Some(inbound) => handle_inbound(inbound, &registry, &pending).await,
                None => break,
            },
            gone = removed.recv() => match gone {
                Ok(session_id) => fail_session(&pending, &session_id).await,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "missed session removals, rechecking pending asks");
                    let sessions: HashSet<String> = pending
                        .lock()
                        .await
                        .values()
                        .map(|w| w.session_id.clone())
                        .collect();
                    for session_id in sessions {
                        if !registry.contains(&session_id).await {
                            fail_session(&pending, &session_id).await;
                        }
                    }
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
}

/// 丢弃该会话上的全部等待者，ask 随即返回 Closed
async fn fail_session(pending: &Pending, session_id: &str) {
    let mut pending = pending.lock().await;
    let before = pending.len();
    pending.retain(|_, w| w.session_id != session_id);
    let failed = before - pending.len();
    if failed > 0 {
        tracing::warn!(session = %session_id, failed, "session gone with asks in flight");
    }
}

async fn handle_inbound(inbound: Inbound, registry: &SessionRegistry, pending: &Pending) {
    let Inbound {
        session_id,
        message,
        ..
    } = inbound;
    match message {
        SessionMessage::Answer {
            request_id,
            content,
            is_error,
        } => {
            let waiter = pending.lock().await.remove(&request_id);
            match waiter {
                Some(waiter) => {
                    let _ = waiter.tx.send(RemoteAnswer { content, is_error });
                }
                None => {
                    tracing::debug!(session = %session_id, request = %request_id, "answer for unknown request");
                }
            }
        }
        SessionMessage::Ping { timestamp } => {
            registry.send(&session_id, SessionMessage::Pong { timestamp }).await;
        }
        SessionMessage::Welcome { .. } => {
            tracing::debug!(session = %session_id, "session welcomed");
        }
        SessionMessage::Error { code, message } => {
            tracing::warn!(session = %session_id, code = %code, "remote error: {}", message);
        }
        _ => {}
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::session::ProcessTransport;
    use std::time::Instant;

    #[tokio::test]
    async fn test_ask_fails_fast_when_peer_exits() {
        let client = SessionClient::new();
        // 读一行（ask）后直接退出，不作回答
        let transport = ProcessTransport::new("sh")
            .with_args(vec!["-c".to_string(), "read x; exit 0".to_string()])
            .with_inbox(client.inbox());
        client.registry().connect("w", &transport).await.unwrap();

        let started = Instant::now();
        let result = client.ask("w", "hi", None, Duration::from_secs(10)).await;
        assert!(matches!(result, Err(TransportError::Closed)));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!client.registry().contains("w").await);
    }

    #[tokio::test]
    async fn test_answer_resolves_ask() {
        let client = SessionClient::new();
        // 把收到的 ask 原样改写成 answer 回显
        let script = r#"read x; id=$(echo "$x" | sed 's/.*"request_id":"\([^"]*\)".*/\1/'); echo "{\"type\":\"answer\",\"request_id\":\"$id\",\"content\":\"pong\"}"; sleep 5"#;
        let transport = ProcessTransport::new("sh")
            .with_args(vec!["-c".to_string(), script.to_string()])
            .with_inbox(client.inbox());
        client.registry().connect("w", &transport).await.unwrap();

        let answer = client.ask("w", "hi", None, Duration::from_secs(5)).await.unwrap();
        assert_eq!(answer.content, "pong");
        assert!(!answer.is_error);
        client.registry().close_all().await;
    }
}
