//! Agent 构建器：从配置组装推理网关、工具注册表与编排循环
//!
//! CLI、会话服务端与 stdio worker 共用这一套初始化逻辑。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::core::AgentError;
use crate::llm::{create_gateway, InferenceGateway};
use crate::tool_call::{LoopConfig, ToolCallLoop};
use crate::tools::{EchoTool, PluginTool, TimeTool, Tool, ToolExecutor, ToolRegistry};

/// Agent 构建器
pub struct AgentBuilder {
    config: AppConfig,
    gateway: Option<Arc<dyn InferenceGateway>>,
    extra_tools: Vec<Arc<dyn Tool>>,
}

impl AgentBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            gateway: None,
            extra_tools: Vec::new(),
        }
    }

    /// 使用指定网关，而不是按 [llm] 配置创建
    pub fn with_gateway(mut self, gateway: Arc<dyn InferenceGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// 追加工具（排在配置中的工具之后）
    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.extra_tools.push(tool);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 工具注册表：time_tool、可选 echo、[[tools.plugins]]、追加的工具
    pub fn build_tool_registry(&self) -> Result<ToolRegistry, AgentError> {
        let tools = &self.config.tools;
        let mut registry = ToolRegistry::new();
        registry.register(TimeTool::new(
            tools.time_format.clone(),
            tools.time_description.as_deref(),
        ))?;
        if tools.echo {
            registry.register(EchoTool)?;
        }
        for entry in &tools.plugins {
            registry.register(PluginTool::new(entry))?;
        }
        for tool in &self.extra_tools {
            registry.register_arc(Arc::clone(tool))?;
        }
        Ok(registry)
    }

    pub fn build_gateway(&self) -> Result<Arc<dyn InferenceGateway>, AgentError> {
        match &self.gateway {
            Some(gateway) => Ok(Arc::clone(gateway)),
            None => create_gateway(&self.config.llm),
        }
    }

    pub fn build(&self) -> Result<ToolCallLoop, AgentError> {
        let gateway = self.build_gateway()?;
        let registry = self.build_tool_registry()?;
        tracing::info!(tools = ?registry.tool_names(), gateway = %gateway.name(), "agent ready");
        let executor = ToolExecutor::new(registry)
            .with_timeout(self.config.agent.tool_timeout_secs.map(Duration::from_secs));
        Ok(ToolCallLoop::new(
            gateway,
            executor,
            LoopConfig::from(&self.config.agent),
        ))
    }
}

/// 便捷函数：加载配置并创建 AgentBuilder；配置加载失败时使用默认值
pub fn create_agent_builder(config_path: Option<PathBuf>) -> AgentBuilder {
    let config = crate::config::load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    AgentBuilder::new(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PluginEntry;
    use crate::llm::MockGateway;

    fn mock_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.llm.provider = "mock".to_string();
        config
    }

    #[test]
    fn test_registry_from_config() {
        let mut config = mock_config();
        config.tools.echo = true;
        config.tools.plugins.push(PluginEntry {
            name: "upper".to_string(),
            description: "Uppercase".to_string(),
            program: "tr".to_string(),
            args: vec![],
            required: vec![],
            timeout_secs: 5,
        });
        let registry = AgentBuilder::new(config).build_tool_registry().unwrap();
        assert_eq!(registry.tool_names(), vec!["time_tool", "echo", "upper"]);
    }

    #[test]
    fn test_duplicate_extra_tool_is_rejected() {
        let builder = AgentBuilder::new(mock_config()).with_tool(Arc::new(TimeTool::default()));
        assert!(matches!(
            builder.build_tool_registry(),
            Err(AgentError::DuplicateTool(name)) if name == "time_tool"
        ));
    }

    #[test]
    fn test_build_with_injected_gateway() {
        let agent = AgentBuilder::new(AppConfig::default())
            .with_gateway(Arc::new(MockGateway))
            .build()
            .unwrap();
        assert_eq!(agent.tools().len(), 1);
        assert_eq!(agent.config().max_tool_rounds, 1);
    }
}
