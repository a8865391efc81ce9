//! 会话注册表集成测试

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use bookroom_agent::session::{
        ChannelState, CloseHook, SessionChannel, SessionMessage, SessionRegistry, Transport,
        TransportError,
    };

    /// 内存通道：记录发送的消息，可模拟对端断开
    struct MemoryChannel {
        session_id: String,
        channel_id: String,
        closed: AtomicBool,
        sent: Mutex<Vec<SessionMessage>>,
        hook: CloseHook,
    }

    impl MemoryChannel {
        async fn disconnect(&self) {
            self.closed.store(true, Ordering::SeqCst);
            self.hook.notify_closed(&self.channel_id).await;
        }

        fn sent(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl SessionChannel for MemoryChannel {
        fn session_id(&self) -> &str {
            &self.session_id
        }

        fn channel_id(&self) -> &str {
            &self.channel_id
        }

        fn state(&self) -> ChannelState {
            if self.closed.load(Ordering::SeqCst) {
                ChannelState::Closed
            } else {
                ChannelState::Connected
            }
        }

        async fn send(&self, message: SessionMessage) -> Result<(), TransportError> {
            if self.closed.load(Ordering::SeqCst) {
                return Err(TransportError::Closed);
            }
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    /// 记录自己建立过的每条通道
    #[derive(Default)]
    struct MemoryTransport {
        opened: Mutex<Vec<Arc<MemoryChannel>>>,
        counter: AtomicUsize,
    }

    impl MemoryTransport {
        fn channel(&self, index: usize) -> Arc<MemoryChannel> {
            Arc::clone(&self.opened.lock().unwrap()[index])
        }
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn connect(
            &self,
            session_id: &str,
            hook: CloseHook,
        ) -> Result<Arc<dyn SessionChannel>, TransportError> {
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            let channel = Arc::new(MemoryChannel {
                session_id: session_id.to_string(),
                channel_id: format!("mem-{}", n),
                closed: AtomicBool::new(false),
                sent: Mutex::new(Vec::new()),
                hook,
            });
            self.opened.lock().unwrap().push(Arc::clone(&channel));
            Ok(channel as Arc<dyn SessionChannel>)
        }
    }

    #[tokio::test]
    async fn test_second_connect_replaces_first() {
        let registry = SessionRegistry::new();
        let transport = MemoryTransport::default();

        registry.connect("s1", &transport).await.unwrap();
        let second = registry.connect("s1", &transport).await.unwrap();

        assert_eq!(registry.len().await, 1);
        let current = registry.get("s1").await.unwrap();
        assert_eq!(current.channel_id(), second.channel_id());
        assert_eq!(transport.channel(0).state(), ChannelState::Closed);
        assert_eq!(transport.channel(1).state(), ChannelState::Connected);
    }

    #[tokio::test]
    async fn test_close_unknown_session_is_noop() {
        let registry = SessionRegistry::new();
        assert!(!registry.close("ghost").await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_peer_disconnect_prunes_entry() {
        let registry = SessionRegistry::new();
        let transport = MemoryTransport::default();
        registry.connect("s1", &transport).await.unwrap();
        registry.connect("s2", &transport).await.unwrap();

        transport.channel(0).disconnect().await;
        assert_eq!(registry.session_ids().await, vec!["s2".to_string()]);
        assert!(!registry.send("s1", SessionMessage::ping()).await);
    }

    #[tokio::test]
    async fn test_replaced_channel_late_disconnect_keeps_successor() {
        let registry = SessionRegistry::new();
        let transport = MemoryTransport::default();
        registry.connect("s1", &transport).await.unwrap();
        registry.connect("s1", &transport).await.unwrap();

        transport.channel(0).disconnect().await;
        assert!(registry.contains("s1").await);
        assert!(registry.send("s1", SessionMessage::ping()).await);
        assert_eq!(transport.channel(1).sent(), 1);
        assert_eq!(transport.channel(0).sent(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_sessions() {
        let registry = SessionRegistry::new();
        let transport = Arc::new(MemoryTransport::default());
        let mut handles = Vec::new();
        for i in 0..32 {
            let registry = registry.clone();
            let transport = Arc::clone(&transport);
            handles.push(tokio::spawn(async move {
                let id = format!("s{}", i % 8);
                registry.connect(&id, transport.as_ref()).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(registry.len().await, 8);
        let live = transport
            .opened
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.state() == ChannelState::Connected)
            .count();
        assert_eq!(live, 8);

        registry.close_all().await;
        assert!(registry.is_empty().await);
    }
}
