//! 把智能体当作工具：本地的另一个编排循环，或经会话通道连接的远程智能体

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::session::SessionClient;
use crate::tool_call::{AgentRequest, ToolCallLoop};
use crate::tools::registry::compose_description;
use crate::tools::schema::parameters_schema_for;
use crate::tools::{Tool, ToolResult};

const AGENT_DESCRIPTION: &str = "API based on Agent | 智能接口 | 可以通过对话与智能模型进行交互";

#[derive(Deserialize, JsonSchema)]
struct AgentArgs {
    /// 交给智能体的问题
    query: String,
}

fn parse_query(tool: &str, args: Value) -> Result<String, ToolResult> {
    serde_json::from_value::<AgentArgs>(args)
        .map(|a| a.query)
        .map_err(|e| ToolResult::error(format!("{}: {}", tool, e)))
}

/// agent_tool：把 query 交给进程内的另一个编排循环
pub struct AgentTool {
    name: String,
    description: String,
    agent: Arc<ToolCallLoop>,
}

impl AgentTool {
    pub fn new(agent: Arc<ToolCallLoop>, description_suffix: Option<&str>) -> Self {
        Self {
            name: "agent_tool".to_string(),
            description: compose_description(AGENT_DESCRIPTION, description_suffix),
            agent,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[async_trait]
impl Tool for AgentTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema_for::<AgentArgs>()
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let query = match parse_query(&self.name, args) {
            Ok(q) => q,
            Err(result) => return result,
        };
        let reply = self.agent.run(AgentRequest::new(query)).await;
        if reply.is_error {
            ToolResult::error(reply.content)
        } else {
            ToolResult::text(reply.content)
        }
    }
}

/// 远程智能体工具：经 SessionClient 向某个会话发送 ask
pub struct RemoteAgentTool {
    name: String,
    description: String,
    client: Arc<SessionClient>,
    session_id: String,
    timeout: Duration,
}

impl RemoteAgentTool {
    pub fn new(
        name: impl Into<String>,
        client: Arc<SessionClient>,
        session_id: impl Into<String>,
        description_suffix: Option<&str>,
    ) -> Self {
        Self {
            name: name.into(),
            description: compose_description(AGENT_DESCRIPTION, description_suffix),
            client,
            session_id: session_id.into(),
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Tool for RemoteAgentTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema_for::<AgentArgs>()
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let query = match parse_query(&self.name, args) {
            Ok(q) => q,
            Err(result) => return result,
        };
        match self
            .client
            .ask(&self.session_id, query, None, self.timeout)
            .await
        {
            Ok(answer) if answer.is_error => ToolResult::error(answer.content),
            Ok(answer) => ToolResult::text(answer.content),
            Err(e) => ToolResult::error(format!(
                "remote agent '{}' unavailable: {}",
                self.session_id, e
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Completion, ScriptedGateway};
    use crate::tool_call::LoopConfig;
    use crate::tools::{ToolExecutor, ToolRegistry};
    use serde_json::json;

    fn inner_agent(script: Vec<Result<Completion, crate::llm::LlmError>>) -> Arc<ToolCallLoop> {
        Arc::new(ToolCallLoop::new(
            Arc::new(ScriptedGateway::new(script)),
            ToolExecutor::new(ToolRegistry::new()),
            LoopConfig::default(),
        ))
    }

    #[tokio::test]
    async fn test_agent_tool_returns_inner_reply() {
        let tool = AgentTool::new(inner_agent(vec![Ok(Completion::text("书房今天开放"))]), None);
        let result = tool.execute(json!({"query": "书房开门吗"})).await;
        assert!(!result.is_error);
        assert_eq!(result.text_content(), "书房今天开放");
    }

    #[tokio::test]
    async fn test_agent_tool_propagates_failure() {
        let tool = AgentTool::new(inner_agent(vec![Err(crate::llm::LlmError::Timeout)]), Some("书房助手"));
        assert!(tool.description().ends_with("| 书房助手"));
        let result = tool.execute(json!({"query": "hi"})).await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn test_remote_tool_without_session_is_error() {
        let client = Arc::new(SessionClient::new());
        let tool = RemoteAgentTool::new("remote_agent", client, "nobody", None);
        let result = tool.execute(json!({"query": "hi"})).await;
        assert!(result.is_error);
        assert!(result.text_content().contains("nobody"));
    }
}
