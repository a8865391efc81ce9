//! 核心层：错误类型与 Agent 构建器

pub mod builder;
pub mod error;

pub use builder::{create_agent_builder, AgentBuilder};
pub use error::AgentError;
