//! 推理网关层：网关抽象与实现（OpenAI 兼容 / Mock / Scripted）

pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

use crate::config::LlmSection;
use crate::core::AgentError;

pub use mock::{MockGateway, RecordedCall, ScriptedGateway};
pub use openai::{OpenAiGateway, OpenAiGatewayConfig, OPENAI_BASE_URL};
pub use traits::{
    Completion, InferenceGateway, LlmError, TokenStream, TokenUsage, ToolInvocation, UsageSlot,
};

const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com/v1";

/// 按 [llm] 配置创建网关
///
/// - `mock`：离线网关，不需要 API Key
/// - `openai` / `deepseek` / 其他 OpenAI 兼容服务：API Key 取配置，缺省读 `{PROVIDER}_API_KEY`，
///   两处都没有则启动失败
pub fn create_gateway(llm: &LlmSection) -> Result<Arc<dyn InferenceGateway>, AgentError> {
    let provider = llm.provider.trim().to_lowercase();
    if provider == "mock" {
        tracing::info!("Using mock inference gateway");
        return Ok(Arc::new(MockGateway));
    }
    if provider.is_empty() {
        return Err(AgentError::ConfigError("llm.provider is empty".to_string()));
    }

    let env_key = format!("{}_API_KEY", provider.to_uppercase());
    let api_key = llm
        .api_key
        .clone()
        .filter(|k| !k.trim().is_empty())
        .or_else(|| std::env::var(&env_key).ok().filter(|k| !k.trim().is_empty()))
        .ok_or_else(|| {
            AgentError::ConfigError(format!(
                "provider '{}' needs llm.api_key or {}",
                provider, env_key
            ))
        })?;

    let base_url = match (llm.base_url.as_deref(), provider.as_str()) {
        (Some(url), _) => url.to_string(),
        (None, "openai") => OPENAI_BASE_URL.to_string(),
        (None, "deepseek") => DEEPSEEK_BASE_URL.to_string(),
        (None, other) => {
            return Err(AgentError::ConfigError(format!(
                "provider '{}' needs llm.base_url",
                other
            )))
        }
    };

    let mut config = OpenAiGatewayConfig::new(api_key, llm.model.clone()).with_base_url(base_url);
    config.temperature = llm.temperature;
    config.top_p = llm.top_p;
    config.max_tokens = llm.max_tokens;
    config.request_timeout_secs = Some(llm.timeouts.request).filter(|secs| *secs > 0);

    let gateway = OpenAiGateway::new(config).map_err(AgentError::Gateway)?;
    tracing::info!(provider = %provider, model = %llm.model, "Using OpenAI-compatible gateway");
    Ok(Arc::new(gateway))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_provider_needs_no_key() {
        let llm = LlmSection {
            provider: "mock".to_string(),
            ..LlmSection::default()
        };
        let gateway = create_gateway(&llm).unwrap();
        assert_eq!(gateway.name(), "mock");
    }

    #[test]
    fn test_unknown_provider_without_base_url_is_config_error() {
        let llm = LlmSection {
            provider: "nowhere".to_string(),
            api_key: Some("sk-x".to_string()),
            ..LlmSection::default()
        };
        assert!(matches!(create_gateway(&llm), Err(AgentError::ConfigError(_))));
    }

    #[test]
    fn test_configured_key_builds_openai_gateway() {
        let llm = LlmSection {
            provider: "openai".to_string(),
            api_key: Some("sk-x".to_string()),
            ..LlmSection::default()
        };
        let gateway = create_gateway(&llm).unwrap();
        assert_eq!(gateway.name(), "openai");
    }
}
