//! 工具层：Tool trait、能力注册表、执行器与内置工具

pub mod agent;
pub mod echo;
pub mod executor;
pub mod plugin;
pub mod registry;
pub mod result;
pub mod schema;
pub mod time;

pub use agent::{AgentTool, RemoteAgentTool};
pub use echo::EchoTool;
pub use executor::{ToolExecutor, ToolOutcome};
pub use plugin::PluginTool;
pub use registry::{compose_description, validate_arguments, Tool, ToolRegistry, ToolSpec};
pub use result::{tool_result_schema, ContentBlock, ToolResult};
pub use schema::parameters_schema_for;
pub use time::TimeTool;
