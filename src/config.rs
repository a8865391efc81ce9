//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `BOOKROOM__*` 覆盖（双下划线表示嵌套，如 `BOOKROOM__LLM__PROVIDER=mock`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub agent: AgentSection,
    pub tools: ToolsSection,
    pub session: SessionSection,
}

/// [app] 段
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [llm] 段：后端选择、采样参数与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：openai / deepseek / mock / 其他 OpenAI 兼容服务（需 base_url）
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    /// 缺省读环境变量 `{PROVIDER}_API_KEY`
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: Option<f32>,
    #[serde(default = "default_top_p")]
    pub top_p: Option<f32>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            api_key: None,
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_tokens: default_max_tokens(),
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> Option<f32> {
    Some(0.7)
}

fn default_top_p() -> Option<f32> {
    Some(0.8)
}

fn default_max_tokens() -> Option<u32> {
    Some(4096)
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    /// HTTP 请求超时（秒），0 表示不限
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

/// [agent] 段：编排循环参数
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    /// 追加在工具清单之后的系统提示
    pub system_prompt: Option<String>,
    /// 提供工具的网关轮数；之后一轮不再提供工具
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
    /// 单次工具调用超时（秒）；不设则不限
    pub tool_timeout_secs: Option<u64>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            system_prompt: None,
            max_tool_rounds: default_max_tool_rounds(),
            tool_timeout_secs: None,
        }
    }
}

fn default_max_tool_rounds() -> usize {
    1
}

/// [tools] 段：内置工具与插件
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// time_tool 的 chrono 格式串
    #[serde(default = "default_time_format")]
    pub time_format: String,
    /// time_tool 的补充描述
    pub time_description: Option<String>,
    /// 是否注册 echo 工具
    #[serde(default)]
    pub echo: bool,
    #[serde(default)]
    pub plugins: Vec<PluginEntry>,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            time_format: default_time_format(),
            time_description: None,
            echo: false,
            plugins: Vec::new(),
        }
    }
}

fn default_time_format() -> String {
    "%Y-%m-%d %H:%M:%S".to_string()
}

/// [[tools.plugins]]：程序 + 参数模板，参数中的 {{key}} 由调用参数替换
#[derive(Debug, Clone, Deserialize)]
pub struct PluginEntry {
    pub name: String,
    pub description: String,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// 参数 schema 中的必填字段（均为 string）
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default = "default_plugin_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_plugin_timeout_secs() -> u64 {
    30
}

/// [session] 段：会话服务监听地址、stdio worker 命令
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSection {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_worker_program")]
    pub worker_program: String,
    #[serde(default)]
    pub worker_args: Vec<String>,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            worker_program: default_worker_program(),
            worker_args: Vec::new(),
        }
    }
}

fn default_bind_addr() -> String {
    "127.0.0.1:9100".to_string()
}

fn default_worker_program() -> String {
    "bookroom-worker".to_string()
}

/// 从 config 目录加载配置，环境变量 BOOKROOM__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 BOOKROOM__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("BOOKROOM")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
