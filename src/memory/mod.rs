//! 记忆层：单次编排内的对话消息

pub mod conversation;

pub use conversation::{Conversation, Message, MessageContent, Role};
