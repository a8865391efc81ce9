//! Bookroom Worker - 子进程管道的对端
//!
//! 从 stdin 按行读取会话信封，ask 交给编排循环，chunk / answer 按行写回 stdout。
//! 日志写 stderr。stdin 关闭即退出。

use anyhow::Context;
use bookroom_agent::core::create_agent_builder;
use bookroom_agent::observability;
use bookroom_agent::session::{answer_ask, SessionMessage};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init_stderr();

    let agent = Arc::new(
        create_agent_builder(None)
            .build()
            .context("Failed to create agent")?,
    );

    // 所有输出经同一个写任务，保证每行完整
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<SessionMessage>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(message) = out_rx.recv().await {
            let mut line = match message.to_json() {
                Ok(line) => line,
                Err(e) => {
                    tracing::error!("encode failed: {}", e);
                    continue;
                }
            };
            line.push('\n');
            if stdout.write_all(line.as_bytes()).await.is_err() || stdout.flush().await.is_err() {
                break;
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("stdin read failed")? {
        if line.trim().is_empty() {
            continue;
        }
        let message = match SessionMessage::from_json(&line) {
            Ok(m) => m,
            Err(e) => {
                let _ = out_tx.send(SessionMessage::error("bad_request", e.to_string()));
                continue;
            }
        };
        match message {
            SessionMessage::Hello { session_id } => {
                let _ = out_tx.send(SessionMessage::Welcome { session_id });
            }
            SessionMessage::Ping { timestamp } => {
                let _ = out_tx.send(SessionMessage::Pong { timestamp });
            }
            SessionMessage::Ask {
                request_id,
                content,
                system_prompt,
            } => {
                let agent = Arc::clone(&agent);
                let out = out_tx.clone();
                tokio::spawn(async move {
                    answer_ask(&agent, request_id, content, system_prompt, &out).await;
                });
            }
            other => tracing::debug!(message = ?other, "ignoring message"),
        }
    }

    tracing::info!("stdin closed, worker exiting");
    drop(out_tx);
    let _ = writer.await;
    Ok(())
}
