//! 子进程管道通道
//!
//! 每个会话启动一个子进程，stdin / stdout 上按行传输 JSON 信封；
//! stdout 读到 EOF（子进程退出）即视为通道关闭。close 会杀掉并回收子进程。

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use crate::session::channel::{
    new_channel_id, ChannelState, InboxSender, Inbound, SessionChannel, StateCell, Transport,
    TransportError,
};
use crate::session::message::SessionMessage;
use crate::session::registry::CloseHook;

/// 以「程序 + 参数」启动对端进程的传输
#[derive(Debug, Clone)]
pub struct ProcessTransport {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    inbox: Option<InboxSender>,
}

impl ProcessTransport {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            inbox: None,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// 对端发来的消息转发到该收件箱；不设置则丢弃
    pub fn with_inbox(mut self, inbox: InboxSender) -> Self {
        self.inbox = Some(inbox);
        self
    }
}

#[async_trait]
impl Transport for ProcessTransport {
    async fn connect(
        &self,
        session_id: &str,
        hook: CloseHook,
    ) -> Result<Arc<dyn SessionChannel>, TransportError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }

        let mut child = command
            .spawn()
            .map_err(|e| TransportError::Spawn(format!("{}: {}", self.program, e)))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Spawn("child stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Spawn("child stdout unavailable".to_string()))?;

        let channel_id = new_channel_id();
        let state = StateCell::new(ChannelState::Connected);
        tracing::debug!(
            session = %session_id,
            program = %self.program,
            pid = ?child.id(),
            "spawned session process"
        );

        tokio::spawn(read_stdout(
            stdout,
            session_id.to_string(),
            channel_id.clone(),
            state.clone(),
            self.inbox.clone(),
            hook,
        ));

        Ok(Arc::new(ProcessChannel {
            session_id: session_id.to_string(),
            channel_id,
            state,
            stdin: Mutex::new(Some(stdin)),
            child: Mutex::new(Some(child)),
        }))
    }
}

async fn read_stdout(
    stdout: ChildStdout,
    session_id: String,
    channel_id: String,
    state: StateCell,
    inbox: Option<InboxSender>,
    hook: CloseHook,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match SessionMessage::from_json(&line) {
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
                        tracing::warn!(session = %session_id, error = %e, "ignoring malformed line from session process");
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(session = %session_id, error = %e, "session process stdout failed");
                break;
            }
        }
    }
    state.mark_closed();
    hook.notify_closed(&channel_id).await;
}

/// 子进程通道
pub struct ProcessChannel {
    session_id: String,
    channel_id: String,
    state: StateCell,
    stdin: Mutex<Option<ChildStdin>>,
    child: Mutex<Option<Child>>,
}

#[async_trait]
impl SessionChannel for ProcessChannel {
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
        let mut line = message.to_json()?;
        line.push('\n');

        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(TransportError::Closed)?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn close(&self) {
        self.state.mark_closed();
        // 先关 stdin，让守规矩的对端自行退出
        self.stdin.lock().await.take();
        let child = self.child.lock().await.take();
        if let Some(mut child) = child {
            if let Err(e) = child.start_kill() {
                tracing::debug!(session = %self.session_id, error = %e, "session process already exited");
            }
            if let Err(e) = child.wait().await {
                tracing::warn!(session = %self.session_id, error = %e, "failed to reap session process");
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::session::SessionRegistry;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_cat_echoes_envelopes() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let transport = ProcessTransport::new("cat").with_inbox(tx);
        let registry = SessionRegistry::new();
        registry.connect("s1", &transport).await.unwrap();

        assert!(registry.send("s1", SessionMessage::Ping { timestamp: 7 }).await);
        let inbound = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(inbound.session_id, "s1");
        assert_eq!(inbound.message, SessionMessage::Ping { timestamp: 7 });
        assert!(registry.close("s1").await);
    }

    #[tokio::test]
    async fn test_exited_process_is_pruned() {
        let registry = SessionRegistry::new();
        registry
            .connect("s1", &ProcessTransport::new("true"))
            .await
            .unwrap();
        let mut pruned = false;
        for _ in 0..100 {
            if !registry.contains("s1").await {
                pruned = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(pruned);
    }

    #[tokio::test]
    async fn test_close_kills_child() {
        let transport = ProcessTransport::new("sleep").with_args(vec!["30".to_string()]);
        let channel = transport
            .connect("s1", CloseHook::detached("s1"))
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), channel.close())
            .await
            .unwrap();
        assert_eq!(channel.state(), ChannelState::Closed);
        assert!(channel.send(SessionMessage::ping()).await.is_err());
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let transport = ProcessTransport::new("definitely-not-a-real-program-xyz");
        let result = transport.connect("s1", CloseHook::detached("s1")).await;
        assert!(matches!(result, Err(TransportError::Spawn(_))));
    }
}
