//! 会话信封：WebSocket 每帧 / stdio 每行一个 JSON 对象

use serde::{Deserialize, Serialize};

/// 会话两端交换的消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionMessage {
    /// 客户端建立会话
    Hello { session_id: String },
    /// 服务端确认会话
    Welcome { session_id: String },
    /// 请求对端智能体回答
    Ask {
        request_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        system_prompt: Option<String>,
    },
    /// 流式回答的一段
    Chunk { request_id: String, content: String },
    /// 最终回答
    Answer {
        request_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
    Error { code: String, message: String },
    Ping { timestamp: i64 },
    Pong { timestamp: i64 },
}

impl SessionMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    pub fn ping() -> Self {
        SessionMessage::Ping {
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        SessionMessage::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    /// ask / chunk / answer 所属的请求
    pub fn request_id(&self) -> Option<&str> {
        match self {
            SessionMessage::Ask { request_id, .. }
            | SessionMessage::Chunk { request_id, .. }
            | SessionMessage::Answer { request_id, .. } => Some(request_id),
            _ => None,
        }
    }
}
