//! Bookroom Gateway - WebSocket 会话服务端
//!
//! 对端先发送 `{"type":"hello","session_id":"..."}`，之后可发送 ask 并收到 chunk / answer。
//!
//! 运行方式：
//! ```bash
//! cargo run --bin bookroom-gateway
//! ```

use std::sync::Arc;

use anyhow::Context;
use bookroom_agent::core::create_agent_builder;
use bookroom_agent::observability;
use bookroom_agent::session::SessionServer;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let builder = create_agent_builder(None);
    let bind_addr = builder.config().session.bind_addr.clone();
    let agent = Arc::new(builder.build().context("Failed to create agent")?);

    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    let server = Arc::new(SessionServer::new(agent));

    let serving = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.serve(listener).await })
    };

    tracing::info!("Press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down session server...");
    server.shutdown();
    serving.await?.context("Session server failed")?;
    Ok(())
}
