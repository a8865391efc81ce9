//! 工具调用编排：提示词、过程事件与有界循环

pub mod events;
pub mod loop_;
pub mod prompt;

pub use events::LoopEvent;
pub use loop_::{AgentReply, AgentRequest, AgentResponse, LoopConfig, ReplyBody, ToolCallLoop};
pub use prompt::create_prompt;
