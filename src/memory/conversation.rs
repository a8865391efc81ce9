//! 对话消息
//!
//! 一次编排调用内的消息序列只追加不修改；跨调用的持久化由调用方负责。

use serde::{Deserialize, Serialize};

use crate::llm::ToolInvocation;
use crate::tools::{ContentBlock, ToolResult};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// 消息内容：纯文本或多段结构化内容
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentBlock>),
}

impl MessageContent {
    /// 渲染为纯文本（多段按换行拼接）
    pub fn as_text(&self) -> String {
        match self {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .map(ContentBlock::render)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            MessageContent::Text(s) => s.trim().is_empty(),
            MessageContent::Parts(parts) => parts.is_empty(),
        }
    }
}

impl From<String> for MessageContent {
    fn from(s: String) -> Self {
        MessageContent::Text(s)
    }
}

impl From<&str> for MessageContent {
    fn from(s: &str) -> Self {
        MessageContent::Text(s.to_string())
    }
}

/// 单条消息；assistant 可携带 tool_calls，tool 消息通过 tool_call_id 指回对应调用
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolInvocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// tool 消息对应的工具名
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// 仅 tool 消息：工具是否失败
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl Message {
    fn plain(role: Role, content: impl Into<MessageContent>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
            is_error: false,
        }
    }

    pub fn system(content: impl Into<MessageContent>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<MessageContent>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<MessageContent>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// 携带工具调用请求的 assistant 消息（content 可为空）
    pub fn assistant_with_tool_calls(
        content: impl Into<MessageContent>,
        tool_calls: Vec<ToolInvocation>,
    ) -> Self {
        Self {
            tool_calls,
            ..Self::plain(Role::Assistant, content)
        }
    }

    /// 工具结果消息，tool_call_id 指回 invocation.id
    pub fn tool(invocation: &ToolInvocation, result: &ToolResult) -> Self {
        Self {
            tool_call_id: Some(invocation.id.clone()),
            name: Some(invocation.name.clone()),
            is_error: result.is_error,
            ..Self::plain(Role::Tool, MessageContent::Parts(result.content.clone()))
        }
    }

    pub fn text(&self) -> String {
        self.content.as_text()
    }
}

/// 单次编排调用内的只追加消息序列
#[derive(Clone, Debug, Default)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, msg: Message) {
        self.messages.push(msg);
    }

    pub fn extend(&mut self, msgs: impl IntoIterator<Item = Message>) {
        self.messages.extend(msgs);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
