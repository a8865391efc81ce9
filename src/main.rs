//! Bookroom Agent - 单次问答 CLI
//!
//! ```bash
//! bookroom-agent [--stream] [--worker] [--config path/to/config.toml] <question>
//! ```
//! 后端由 [llm] 配置决定；`BOOKROOM__LLM__PROVIDER=mock` 可离线试跑。
//! `--worker` 按 [session] 配置启动一个 bookroom-worker 子进程，并把它注册为 worker_agent 工具。

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use bookroom_agent::core::create_agent_builder;
use bookroom_agent::observability;
use bookroom_agent::session::{ProcessTransport, SessionClient};
use bookroom_agent::tool_call::{AgentRequest, LoopEvent, ReplyBody};
use bookroom_agent::tools::RemoteAgentTool;
use clap::Parser;
use futures_util::StreamExt;

const WORKER_SESSION: &str = "worker";

/// 单次问答：问题交给编排循环，回答写 stdout
#[derive(Parser, Debug)]
#[command(name = "bookroom-agent")]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// 流式输出最终回答
    #[arg(long)]
    stream: bool,

    /// 启动 bookroom-worker 子进程并注册为 worker_agent 工具
    #[arg(long)]
    worker: bool,

    /// 配置文件路径
    #[arg(long, value_name = "PATH", env = "BOOKROOM_CONFIG")]
    config: Option<PathBuf>,

    /// 问题（多个词按空格拼接）
    #[arg(value_name = "QUESTION", required = true, num_args = 1..)]
    question: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 回答写 stdout，日志写 stderr
    observability::init_stderr();

    let args = CliArgs::parse();
    let mut builder = create_agent_builder(args.config);

    let client = Arc::new(SessionClient::new());
    if args.worker {
        let session = &builder.config().session;
        let transport = ProcessTransport::new(session.worker_program.clone())
            .with_args(session.worker_args.clone())
            .with_inbox(client.inbox());
        client
            .registry()
            .connect(WORKER_SESSION, &transport)
            .await
            .context("Failed to start worker")?;
        builder = builder.with_tool(Arc::new(RemoteAgentTool::new(
            "worker_agent",
            Arc::clone(&client),
            WORKER_SESSION,
            Some("交给子进程中的智能体回答"),
        )));
    }

    let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();
    let agent = builder
        .build()
        .context("Failed to create agent")?
        .with_event_tx(event_tx);

    tokio::spawn(async move {
        while let Some(ev) = event_rx.recv().await {
            match ev {
                LoopEvent::ToolCall { name, args, .. } => eprintln!("[tool] {} {}", name, args),
                LoopEvent::ToolResult {
                    name,
                    is_error,
                    preview,
                    ..
                } => eprintln!("[{}] {} -> {}", if is_error { "error" } else { "ok" }, name, preview),
                _ => {}
            }
        }
    });

    let request = AgentRequest::new(args.question.join(" "));
    let is_error = if args.stream {
        print_streaming(&agent, request).await?
    } else {
        let reply = agent.run(request).await;
        println!("{}", reply.content);
        reply.is_error
    };

    client.registry().close_all().await;
    if is_error {
        bail!("agent failed");
    }
    Ok(())
}

async fn print_streaming(
    agent: &bookroom_agent::ToolCallLoop,
    request: AgentRequest,
) -> anyhow::Result<bool> {
    let response = agent.run_streaming(request).await;
    let is_error = response.is_error;
    match response.body {
        ReplyBody::Text(text) => println!("{}", text),
        ReplyBody::Stream(mut tokens) => {
            let mut stdout = std::io::stdout();
            while let Some(token) = tokens.next().await {
                let token = token.context("Stream failed")?;
                write!(stdout, "{}", token)?;
                stdout.flush()?;
            }
            writeln!(stdout)?;
        }
    }
    Ok(is_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_joins_question_words() {
        let args = CliArgs::try_parse_from(["bookroom-agent", "--stream", "杭州", "天气"]).unwrap();
        assert!(args.stream);
        assert!(!args.worker);
        assert_eq!(args.question.join(" "), "杭州 天气");
    }

    #[test]
    fn test_cli_requires_question() {
        assert!(CliArgs::try_parse_from(["bookroom-agent", "--worker"]).is_err());
    }
}
