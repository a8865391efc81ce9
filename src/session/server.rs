//! 会话服务端：接受 WebSocket 对端，按 hello 中的 session_id 注册通道，
//! 收到 ask 时运行编排循环并以 chunk / answer 回复。

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use crate::session::channel::{InboxReceiver, InboxSender, Inbound, TransportError};
use crate::session::message::SessionMessage;
use crate::session::registry::SessionRegistry;
use crate::session::responder::answer_ask;
use crate::session::stream::WsChannel;
use crate::tool_call::ToolCallLoop;

const HELLO_TIMEOUT: Duration = Duration::from_secs(10);

/// 会话服务端
pub struct SessionServer {
    registry: SessionRegistry,
    agent: Arc<ToolCallLoop>,
    cancel: CancellationToken,
}

impl SessionServer {
    pub fn new(agent: Arc<ToolCallLoop>) -> Self {
        Self {
            registry: SessionRegistry::new(),
            agent,
            cancel: CancellationToken::new(),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 停止接受连接；serve 返回前会关闭全部会话
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// 运行 accept 循环直到 shutdown
    pub async fn serve(&self, listener: TcpListener) -> Result<(), TransportError> {
        let addr = listener.local_addr()?;
        tracing::info!("Session server listening on ws://{}", addr);

        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let dispatcher = tokio::spawn(dispatch(
            inbox_rx,
            self.registry.clone(),
            Arc::clone(&self.agent),
        ));

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = listener.accept() => match result {
                    Ok((stream, peer)) => {
                        let registry = self.registry.clone();
                        let inbox = inbox_tx.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, peer, registry, inbox).await {
                                tracing::warn!("Connection error from {}: {}", peer, e);
                            }
                        });
                    }
                    Err(e) => tracing::error!("Accept error: {}", e),
                }
            }
        }

        tracing::info!("Session server stopping");
        self.registry.close_all().await;
        dispatcher.abort();
        Ok(())
    }
}

/// 握手后等待首帧 hello，再注册通道并回复 welcome
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    registry: SessionRegistry,
    inbox: InboxSender,
) -> Result<(), TransportError> {
    let mut ws = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| TransportError::WebSocket(e.to_string()))?;

    let first = tokio::time::timeout(HELLO_TIMEOUT, ws.next())
        .await
        .map_err(|_| TransportError::WebSocket("timed out waiting for hello".to_string()))?;
    let session_id = match first {
        Some(Ok(WsMessage::Text(text))) => match SessionMessage::from_json(&text) {
            Ok(SessionMessage::Hello { session_id }) if !session_id.is_empty() => session_id,
            _ => {
                return Err(TransportError::WebSocket(
                    "first frame must be a hello envelope".to_string(),
                ))
            }
        },
        Some(Err(e)) => return Err(TransportError::WebSocket(e.to_string())),
        _ => return Err(TransportError::Closed),
    };

    tracing::info!(session = %session_id, peer = %peer, "session hello");
    // 注册完成前读到的消息先留在本连接的队列里，避免回复时会话还不在表中
    let (local_tx, mut local_rx) = mpsc::unbounded_channel();
    let channel = WsChannel::spawn(
        session_id.clone(),
        ws,
        registry.close_hook(&session_id),
        Some(local_tx),
    );
    registry.register(channel).await;
    registry
        .send(&session_id, SessionMessage::Welcome { session_id: session_id.clone() })
        .await;
    tokio::spawn(async move {
        while let Some(inbound) = local_rx.recv().await {
            if inbox.send(inbound).is_err() {
                break;
            }
        }
    });
    Ok(())
}

/// 帧是否来自该会话的当前通道；被替换的旧通道在关闭前读到的帧不再处理
async fn from_current_channel(registry: &SessionRegistry, session_id: &str, channel_id: &str) -> bool {
    registry
        .get(session_id)
        .await
        .map_or(false, |channel| channel.channel_id() == channel_id)
}

async fn dispatch(mut inbox: InboxReceiver, registry: SessionRegistry, agent: Arc<ToolCallLoop>) {
    while let Some(Inbound {
        session_id,
        channel_id,
        message,
    }) = inbox.recv().await
    {
        if !from_current_channel(&registry, &session_id, &channel_id).await {
            tracing::debug!(session = %session_id, channel = %channel_id, "dropping frame from stale channel");
            continue;
        }
        match message {
            SessionMessage::Ask {
                request_id,
                content,
                system_prompt,
            } => {
                let registry = registry.clone();
                let agent = Arc::clone(&agent);
                tokio::spawn(async move {
                    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
                    let producer = tokio::spawn(async move {
                        answer_ask(&agent, request_id, content, system_prompt, &out_tx).await;
                    });
                    while let Some(reply) = out_rx.recv().await {
                        if !registry.send(&session_id, reply).await {
                            tracing::debug!(session = %session_id, "session gone while answering");
                            break;
                        }
                    }
                    drop(out_rx);
                    let _ = producer.await;
                });
            }
            SessionMessage::Ping { timestamp } => {
                registry.send(&session_id, SessionMessage::Pong { timestamp }).await;
            }
            other => {
                tracing::debug!(session = %session_id, message = ?other, "ignoring session message");
            }
        }
    }
}
