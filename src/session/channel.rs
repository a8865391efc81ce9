//! 会话通道契约
//!
//! SessionChannel 是一条按 session_id 标识的双工管道；Transport 负责建立它。
//! 通道自行关闭（对端断开、子进程退出）时调用注册表下发的 CloseHook。

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::session::message::SessionMessage;
use crate::session::registry::CloseHook;

/// 通道状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Unconnected,
    Connected,
    Closed,
}

/// 传输层失败
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Channel closed")]
    Closed,

    #[error("Encode error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Spawn failed: {0}")]
    Spawn(String),
}

/// 通道从对端读到的一条消息
#[derive(Debug, Clone)]
pub struct Inbound {
    pub session_id: String,
    pub channel_id: String,
    pub message: SessionMessage,
}

/// 所有通道共用的收件箱
pub type InboxSender = mpsc::UnboundedSender<Inbound>;
pub type InboxReceiver = mpsc::UnboundedReceiver<Inbound>;

#[async_trait]
pub trait SessionChannel: Send + Sync {
    fn session_id(&self) -> &str;

    /// 通道实例 ID（uuid），同一 session 的新旧通道靠它区分
    fn channel_id(&self) -> &str;

    fn state(&self) -> ChannelState;

    async fn send(&self, message: SessionMessage) -> Result<(), TransportError>;

    /// 关闭通道并释放底层资源；可重复调用
    async fn close(&self);
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(
        &self,
        session_id: &str,
        hook: CloseHook,
    ) -> Result<Arc<dyn SessionChannel>, TransportError>;
}

/// 可在读写任务间共享的通道状态
#[derive(Debug, Clone)]
pub(crate) struct StateCell(Arc<AtomicU8>);

impl StateCell {
    pub(crate) fn new(state: ChannelState) -> Self {
        Self(Arc::new(AtomicU8::new(Self::encode(state))))
    }

    fn encode(state: ChannelState) -> u8 {
        match state {
            ChannelState::Unconnected => 0,
            ChannelState::Connected => 1,
            ChannelState::Closed => 2,
        }
    }

    pub(crate) fn get(&self) -> ChannelState {
        match self.0.load(Ordering::SeqCst) {
            0 => ChannelState::Unconnected,
            1 => ChannelState::Connected,
            _ => ChannelState::Closed,
        }
    }

    #[cfg(test)]
    pub(crate) fn set(&self, state: ChannelState) {
        self.0.store(Self::encode(state), Ordering::SeqCst);
    }

    /// 置为 Closed，返回之前是否已关闭
    pub(crate) fn mark_closed(&self) -> bool {
        self.0.swap(Self::encode(ChannelState::Closed), Ordering::SeqCst) == 2
    }
}

pub(crate) fn new_channel_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_cell_transitions() {
        let state = StateCell::new(ChannelState::Unconnected);
        state.set(ChannelState::Connected);
        assert_eq!(state.get(), ChannelState::Connected);
        assert!(!state.mark_closed());
        assert!(state.mark_closed());
        assert_eq!(state.get(), ChannelState::Closed);
    }
}
