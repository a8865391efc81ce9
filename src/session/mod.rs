//! 会话层：会话通道（WebSocket / 子进程管道）、会话注册表、服务端与客户端

pub mod channel;
pub mod client;
pub mod message;
pub mod process;
pub mod registry;
pub mod responder;
#[cfg(feature = "gateway")]
pub mod server;
#[cfg(feature = "gateway")]
pub mod stream;

pub use channel::{
    ChannelState, InboxReceiver, InboxSender, Inbound, SessionChannel, Transport, TransportError,
};
pub use client::{RemoteAnswer, SessionClient};
pub use message::SessionMessage;
pub use process::{ProcessChannel, ProcessTransport};
pub use registry::{CloseHook, SessionRegistry};
pub use responder::answer_ask;
#[cfg(feature = "gateway")]
pub use server::SessionServer;
#[cfg(feature = "gateway")]
pub use stream::{WsChannel, WsTransport};
