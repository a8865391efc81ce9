//! 插件工具：由配置 [[tools.plugins]] 注册，运行「程序 + 参数模板」实现动态扩展
//!
//! 参数模板中的 {{key}} 从调用参数中取 key；不经 shell，直接 exec program + 替换后的参数，带超时。

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::process::Command;

use crate::config::PluginEntry;
use crate::tools::{Tool, ToolResult};

/// 从配置项构建的插件工具
pub struct PluginTool {
    name: String,
    description: String,
    program: String,
    args_template: Vec<String>,
    required: Vec<String>,
    timeout: Duration,
}

impl PluginTool {
    pub fn new(entry: &PluginEntry) -> Self {
        Self {
            name: entry.name.clone(),
            description: entry.description.clone(),
            program: entry.program.clone(),
            args_template: entry.args.clone(),
            required: entry.required.clone(),
            timeout: Duration::from_secs(entry.timeout_secs),
        }
    }

    /// 替换模板中的 {{key}}
    fn substitute(&self, args: &Value) -> Vec<String> {
        let empty = Map::new();
        let obj = args.as_object().unwrap_or(&empty);
        self.args_template
            .iter()
            .map(|tpl| {
                obj.iter().fold(tpl.clone(), |s, (k, v)| {
                    let val = match v {
                        Value::String(x) => x.clone(),
                        _ => v.to_string(),
                    };
                    s.replace(&format!("{{{{{}}}}}", k), &val)
                })
            })
            .collect()
    }
}

#[async_trait]
impl Tool for PluginTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .required
            .iter()
            .map(|k| (k.clone(), serde_json::json!({ "type": "string" })))
            .collect();
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": self.required,
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let argv = self.substitute(&args);
        tracing::info!(tool = %self.name, program = %self.program, "plugin tool invoke");
        let child = match Command::new(&self.program)
            .args(&argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => return ToolResult::error(format!("plugin spawn failed: {}", e)),
        };

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return ToolResult::error(format!("plugin wait failed: {}", e)),
            Err(_) => {
                return ToolResult::error(format!(
                    "plugin timeout after {}s",
                    self.timeout.as_secs()
                ))
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return ToolResult::error(format!(
                "exit {:?}: stderr {}",
                output.status.code(),
                stderr.trim()
            ));
        }
        ToolResult::text(stdout.trim())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(program: &str, args: &[&str]) -> PluginEntry {
        PluginEntry {
            name: "plugin".to_string(),
            description: "test plugin".to_string(),
            program: program.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            required: vec!["text".to_string()],
            timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn test_substitutes_arguments() {
        let tool = PluginTool::new(&entry("echo", &["hello", "{{text}}"]));
        let result = tool.execute(json!({"text": "杭州"})).await;
        assert!(!result.is_error);
        assert_eq!(result.text_content(), "hello 杭州");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_error() {
        let tool = PluginTool::new(&entry("false", &[]));
        let result = tool.execute(json!({"text": "x"})).await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn test_missing_program_is_error() {
        let tool = PluginTool::new(&entry("definitely-not-a-real-program-xyz", &[]));
        let result = tool.execute(json!({"text": "x"})).await;
        assert!(result.is_error);
        assert!(result.text_content().contains("spawn failed"));
    }
}
