//! 会话注册表
//!
//! session_id → 当前通道。同一 id 后注册者生效，旧通道被移出并关闭；
//! 通道自行断开时经 CloseHook 回调移除，但只移除 channel_id 相同的那一条，
//! 被替换掉的旧通道迟到的关闭通知不会误删新通道。
//! 整张表只有一把 tokio Mutex，通道的 send / close 都在锁外执行。
//! 会话被移除且没有后继通道时，session_id 会广播给 subscribe_removed 的订阅者。

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use tokio::sync::{broadcast, Mutex};

use crate::session::channel::{ChannelState, SessionChannel, Transport, TransportError};
use crate::session::message::SessionMessage;

const REMOVED_CAPACITY: usize = 64;

struct RegistryInner {
    channels: Mutex<HashMap<String, Arc<dyn SessionChannel>>>,
    removed: broadcast::Sender<String>,
}

impl Default for RegistryInner {
    fn default() -> Self {
        let (removed, _) = broadcast::channel(REMOVED_CAPACITY);
        Self {
            channels: Mutex::new(HashMap::new()),
            removed,
        }
    }
}

impl RegistryInner {
    async fn remove_if_current(&self, session_id: &str, channel_id: &str) -> bool {
        let is_current = {
            let mut channels = self.channels.lock().await;
            let is_current = channels
                .get(session_id)
                .map_or(false, |ch| ch.channel_id() == channel_id);
            if is_current {
                channels.remove(session_id);
            }
            is_current
        };
        if is_current {
            self.announce_removed(session_id);
        }
        is_current
    }

    fn announce_removed(&self, session_id: &str) {
        // 没有订阅者时发送失败，忽略
        let _ = self.removed.send(session_id.to_string());
    }
}

/// 注册表下发给通道的关闭回调
#[derive(Clone)]
pub struct CloseHook {
    session_id: String,
    registry: Weak<RegistryInner>,
}

impl CloseHook {
    /// 不属于任何注册表的回调
    pub fn detached(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            registry: Weak::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// 通道已关闭：若它仍是该 session 的当前通道则移除
    pub async fn notify_closed(&self, channel_id: &str) {
        let Some(inner) = self.registry.upgrade() else {
            return;
        };
        if inner.remove_if_current(&self.session_id, channel_id).await {
            tracing::info!(session = %self.session_id, channel = %channel_id, "session channel closed by peer");
        }
    }
}

/// 会话注册表（Clone 共享同一张表）
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 订阅会话移除通知（对端断开、发送失败、close / close_all）；被新通道替换不算移除
    pub fn subscribe_removed(&self) -> broadcast::Receiver<String> {
        self.inner.removed.subscribe()
    }

    pub fn close_hook(&self, session_id: &str) -> CloseHook {
        CloseHook {
            session_id: session_id.to_string(),
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// 经 transport 建立通道并注册
    pub async fn connect(
        &self,
        session_id: &str,
        transport: &dyn Transport,
    ) -> Result<Arc<dyn SessionChannel>, TransportError> {
        let channel = transport.connect(session_id, self.close_hook(session_id)).await?;
        self.register(Arc::clone(&channel)).await;
        tracing::info!(session = %session_id, channel = %channel.channel_id(), "session connected");
        Ok(channel)
    }

    /// 注册通道；同 id 已有的通道被移出、关闭并返回
    pub async fn register(&self, channel: Arc<dyn SessionChannel>) -> Option<Arc<dyn SessionChannel>> {
        let session_id = channel.session_id().to_string();
        let channel_id = channel.channel_id().to_string();
        let (previous, already_closed) = {
            let mut channels = self.inner.channels.lock().await;
            let previous = channels.insert(session_id.clone(), Arc::clone(&channel));
            // 注册前就已断开的通道，其关闭回调已经错过
            let already_closed = channel.state() == ChannelState::Closed;
            if already_closed {
                channels.remove(&session_id);
            }
            (previous, already_closed)
        };
        if already_closed {
            self.inner.announce_removed(&session_id);
        }

        match previous {
            Some(old) if old.channel_id() != channel_id => {
                tracing::info!(session = %session_id, old = %old.channel_id(), "replacing session channel");
                old.close().await;
                Some(old)
            }
            _ => None,
        }
    }

    /// 发送到指定会话；会话不存在返回 false，发送失败则移除并关闭该通道
    pub async fn send(&self, session_id: &str, message: SessionMessage) -> bool {
        let Some(channel) = self.get(session_id).await else {
            tracing::debug!(session = %session_id, "send to unknown session");
            return false;
        };
        match channel.send(message).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(session = %session_id, error = %e, "send failed, dropping session channel");
                self.inner
                    .remove_if_current(session_id, channel.channel_id())
                    .await;
                channel.close().await;
                false
            }
        }
    }

    /// 关闭并移除；会话不存在时返回 false
    pub async fn close(&self, session_id: &str) -> bool {
        let removed = self.inner.channels.lock().await.remove(session_id);
        match removed {
            Some(channel) => {
                self.inner.announce_removed(session_id);
                channel.close().await;
                tracing::info!(session = %session_id, "session closed");
                true
            }
            None => false,
        }
    }

    /// 关闭全部通道
    pub async fn close_all(&self) {
        let drained: Vec<_> = {
            let mut channels = self.inner.channels.lock().await;
            channels.drain().collect()
        };
        for (session_id, channel) in drained {
            self.inner.announce_removed(&session_id);
            channel.close().await;
        }
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<dyn SessionChannel>> {
        self.inner.channels.lock().await.get(session_id).cloned()
    }

    pub async fn contains(&self, session_id: &str) -> bool {
        self.inner.channels.lock().await.contains_key(session_id)
    }

    pub async fn len(&self) -> usize {
        self.inner.channels.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.channels.lock().await.is_empty()
    }

    /// 当前会话 id（排序后）
    pub async fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.channels.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::channel::{new_channel_id, StateCell};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    struct FakeChannel {
        session_id: String,
        channel_id: String,
        state: StateCell,
        fail_send: bool,
        sent: StdMutex<Vec<SessionMessage>>,
    }

    impl FakeChannel {
        fn new(session_id: &str) -> Arc<Self> {
            Self::build(session_id, false)
        }

        fn build(session_id: &str, fail_send: bool) -> Arc<Self> {
            Arc::new(Self {
                session_id: session_id.to_string(),
                channel_id: new_channel_id(),
                state: StateCell::new(ChannelState::Connected),
                fail_send,
                sent: StdMutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl SessionChannel for FakeChannel {
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
            if self.fail_send || self.state.get() == ChannelState::Closed {
                return Err(TransportError::Closed);
            }
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn close(&self) {
            self.state.mark_closed();
        }
    }

    #[tokio::test]
    async fn test_last_writer_wins() {
        let registry = SessionRegistry::new();
        let first = FakeChannel::new("s1");
        let second = FakeChannel::new("s1");
        assert!(registry.register(first.clone()).await.is_none());
        let replaced = registry.register(second.clone()).await.unwrap();
        assert_eq!(replaced.channel_id(), first.channel_id);
        assert_eq!(first.state(), ChannelState::Closed);
        assert_eq!(registry.len().await, 1);

        assert!(registry.send("s1", SessionMessage::ping()).await);
        assert!(first.sent.lock().unwrap().is_empty());
        assert_eq!(second.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stale_close_hook_keeps_successor() {
        let registry = SessionRegistry::new();
        let first = FakeChannel::new("s1");
        let second = FakeChannel::new("s1");
        registry.register(first.clone()).await;
        registry.register(second.clone()).await;

        registry.close_hook("s1").notify_closed(&first.channel_id).await;
        assert!(registry.contains("s1").await);

        registry.close_hook("s1").notify_closed(&second.channel_id).await;
        assert!(!registry.contains("s1").await);
    }

    #[tokio::test]
    async fn test_close_absent_is_noop() {
        let registry = SessionRegistry::new();
        registry.register(FakeChannel::new("s1")).await;
        assert!(!registry.close("missing").await);
        assert!(!registry.send("missing", SessionMessage::ping()).await);
        assert_eq!(registry.session_ids().await, vec!["s1".to_string()]);
    }

    #[tokio::test]
    async fn test_send_failure_drops_channel() {
        let registry = SessionRegistry::new();
        let broken = FakeChannel::build("s1", true);
        registry.register(broken.clone()).await;
        assert!(!registry.send("s1", SessionMessage::ping()).await);
        assert!(!registry.contains("s1").await);
        assert_eq!(broken.state(), ChannelState::Closed);
    }

    #[tokio::test]
    async fn test_close_all() {
        let registry = SessionRegistry::new();
        let a = FakeChannel::new("a");
        let b = FakeChannel::new("b");
        registry.register(a.clone()).await;
        registry.register(b.clone()).await;
        registry.close_all().await;
        assert!(registry.is_empty().await);
        assert_eq!(a.state(), ChannelState::Closed);
        assert_eq!(b.state(), ChannelState::Closed);
    }

    #[tokio::test]
    async fn test_removal_is_announced_without_successor_only() {
        let registry = SessionRegistry::new();
        let mut removed = registry.subscribe_removed();
        let first = FakeChannel::new("s1");
        let second = FakeChannel::new("s1");
        registry.register(first.clone()).await;
        registry.register(second.clone()).await;
        assert!(removed.try_recv().is_err());

        registry.close_hook("s1").notify_closed(&second.channel_id).await;
        assert_eq!(removed.try_recv().unwrap(), "s1");

        registry.register(FakeChannel::new("s2")).await;
        registry.close("s2").await;
        assert_eq!(removed.try_recv().unwrap(), "s2");
    }

    #[tokio::test]
    async fn test_hook_outlives_registry() {
        let hook = {
            let registry = SessionRegistry::new();
            registry.close_hook("s1")
        };
        hook.notify_closed("whatever").await;
        CloseHook::detached("s2").notify_closed("x").await;
    }
}
