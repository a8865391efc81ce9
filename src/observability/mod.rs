//! 可观测性
//!
//! 默认 info 级别，可通过 RUST_LOG 覆盖；stdio worker 的标准输出被会话协议占用，日志写到 stderr。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

pub fn init() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer())
        .init();
}

/// 日志写 stderr（stdout 用于传输）
pub fn init_stderr() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}
