//! WebSocket 推送通道
//!
//! WsChannel 包装一条已握手的 WebSocket：写任务从无界 mpsc 取帧写出，读任务把文本帧
//! 解析成信封转发到收件箱，连接结束时触发 CloseHook。客户端（WsTransport）与服务端共用。

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;

use crate::session::channel::{
    new_channel_id, ChannelState, InboxSender, Inbound, SessionChannel, StateCell, Transport,
    TransportError,
};
use crate::session::message::SessionMessage;
use crate::session::registry::CloseHook;

/// WebSocket 通道
pub struct WsChannel {
    session_id: String,
    channel_id: String,
    state: StateCell,
    tx: Mutex<Option<mpsc::UnboundedSender<WsMessage>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    hook: CloseHook,
}

impl WsChannel {
    /// 接管已握手的 WebSocket，启动读写任务
    pub fn spawn<S>(
        session_id: impl Into<String>,
        ws: WebSocketStream<S>,
        hook: CloseHook,
        inbox: Option<InboxSender>,
    ) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let session_id = session_id.into();
        let channel_id = new_channel_id();
        let state = StateCell::new(ChannelState::Connected);
        let (mut sink, mut source) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();

        let writer_session = session_id.clone();
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Err(e) = sink.send(frame).await {
                    tracing::debug!(session = %writer_session, error = %e, "websocket write failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader = {
            let session_id = session_id.clone();
            let channel_id = channel_id.clone();
            let state = state.clone();
            let hook = hook.clone();
            tokio::spawn(async move {
                while let Some(frame) = source.next().await {
                    match frame {
                        Ok(WsMessage::Text(text)) => match SessionMessage::from_json(&text) {
                            Ok(message) => {
                                if let Some(inbox) = &inbox {
                                    let _ = inbox.send(Inbound {
                                        session_id: session_id.clone(),
                                        channel_id: channel_id.clone(),
                                        message,
                                    });
                                }
                            }
                            Err(e) => {
                                tracing::warn!(session = %session_id, error = %e, "ignoring malformed websocket frame");
                            }
                        },
                        Ok(WsMessage::Close(_)) => break,
                        Ok(_) => {}
                        Err(e) => {
                            tracing::debug!(session = %session_id, error = %e, "websocket read failed");
                            break;
                        }
                    }
                }
                state.mark_closed();
                hook.notify_closed(&channel_id).await;
            })
        };

        Arc::new(Self {
            session_id,
            channel_id,
            state,
            tx: Mutex::new(Some(tx)),
            reader: Mutex::new(Some(reader)),
            hook,
        })
    }
}

#[async_trait]
impl SessionChannel for WsChannel {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn channel_id(&self) -> &str {
        &self.channel_id
    }

    fn state(&self) -> ChannelState {
        self.state.get()
    }

    async fn send(&self, message: SessionMessage) -> Result<(), TransportError> {
        if self.state.get() == ChannelState::Closed {
            return Err(TransportError::Closed);
        }
        let text = message.to_json()?;
        let guard = self.tx.lock().await;
        let tx = guard.as_ref().ok_or(TransportError::Closed)?;
        tx.send(WsMessage::Text(text))
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&self) {
        if self.state.mark_closed() {
            return;
        }
        if let Some(tx) = self.tx.lock().await.take() {
            let _ = tx.send(WsMessage::Close(None));
        }
        if let Some(reader) = self.reader.lock().await.take() {
            reader.abort();
        }
        self.hook.notify_closed(&self.channel_id).await;
    }
}

/// 拨号 WebSocket 服务端，连上后先发送 hello
#[derive(Debug, Clone)]
pub struct WsTransport {
    url: String,
    inbox: Option<InboxSender>,
}

impl WsTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            inbox: None,
        }
    }

    pub fn with_inbox(mut self, inbox: InboxSender) -> Self {
        self.inbox = Some(inbox);
        self
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(
        &self,
        session_id: &str,
        hook: CloseHook,
    ) -> Result<Arc<dyn SessionChannel>, TransportError> {
        let (ws, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))?;
        let channel: Arc<dyn SessionChannel> =
            WsChannel::spawn(session_id, ws, hook, self.inbox.clone());
        channel
            .send(SessionMessage::Hello {
                session_id: session_id.to_string(),
            })
            .await?;
        tracing::debug!(session = %session_id, url = %self.url, "websocket session opened");
        Ok(channel)
    }
}
