//! 工具执行器
//!
//! 持有 ToolRegistry 与可选超时。execute_all 为每个调用 spawn 一个任务并发执行，
//! 按发出顺序汇合结果；未知工具、参数错误、超时、panic 只影响对应的那一个调用。
//! 每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::timeout;

use crate::llm::ToolInvocation;
use crate::tools::registry::invoke_tool;
use crate::tools::{ToolRegistry, ToolResult, ToolSpec};

/// 一次调用及其结果
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub invocation: ToolInvocation,
    pub result: ToolResult,
}

/// 工具执行器：并发扇出、按序汇合
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    timeout: Option<Duration>,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            timeout: None,
        }
    }

    /// 单次调用超时；None 表示不限
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn describe(&self) -> Vec<ToolSpec> {
        self.registry.describe()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    /// 执行单个调用（不 spawn）
    pub async fn execute(&self, invocation: &ToolInvocation) -> ToolResult {
        run_one(Arc::clone(&self.registry), invocation.clone(), self.timeout).await
    }

    /// 并发执行全部调用，结果顺序与 invocations 一致
    ///
    /// 每个调用是独立的 tokio 任务：调用方的 future 被丢弃后，已启动的工具仍会跑完。
    pub async fn execute_all(&self, invocations: &[ToolInvocation]) -> Vec<ToolOutcome> {
        let handles: Vec<_> = invocations
            .iter()
            .map(|inv| {
                let registry = Arc::clone(&self.registry);
                let inv = inv.clone();
                let limit = self.timeout;
                tokio::spawn(async move { run_one(registry, inv, limit).await })
            })
            .collect();

        let mut outcomes = Vec::with_capacity(invocations.len());
        for (inv, handle) in invocations.iter().zip(handles) {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(tool = %inv.name, id = %inv.id, error = %e, "tool task failed");
                    ToolResult::error(format!("Tool {} failed unexpectedly", inv.name))
                }
            };
            outcomes.push(ToolOutcome {
                invocation: inv.clone(),
                result,
            });
        }
        outcomes
    }
}

async fn run_one(
    registry: Arc<ToolRegistry>,
    invocation: ToolInvocation,
    limit: Option<Duration>,
) -> ToolResult {
    let start = Instant::now();
    let preview = args_preview(&invocation);

    let (result, outcome) = if let Some(raw) = invocation.malformed_arguments.as_deref() {
        tracing::warn!(tool = %invocation.name, raw = %raw, "rejecting malformed tool arguments");
        (
            ToolResult::error(format!(
                "Invalid arguments for tool {}: arguments are not valid JSON",
                invocation.name
            )),
            "invalid_arguments",
        )
    } else {
        match registry.get(&invocation.name) {
            None => {
                tracing::warn!(tool = %invocation.name, "unknown tool requested");
                (
                    ToolResult::error(format!("No such tool: {}", invocation.name)),
                    "unknown_tool",
                )
            }
            Some(tool) => {
                let call = invoke_tool(tool, invocation.arguments.clone());
                match limit {
                    Some(limit) => match timeout(limit, call).await {
                        Ok(result) => (result, "done"),
                        Err(_) => (
                            ToolResult::error(format!(
                                "Tool {} timed out after {}s",
                                invocation.name,
                                limit.as_secs_f32()
                            )),
                            "timeout",
                        ),
                    },
                    None => (call.await, "done"),
                }
            }
        }
    };

    let audit = serde_json::json!({
        "event": "tool_audit",
        "tool": invocation.name,
        "id": invocation.id,
        "ok": !result.is_error,
        "outcome": outcome,
        "duration_ms": start.elapsed().as_millis() as u64,
        "args_preview": preview,
    });
    tracing::info!(audit = %audit.to_string(), "tool");
    result
}

fn args_preview(invocation: &ToolInvocation) -> String {
    let s = match invocation.malformed_arguments.as_deref() {
        Some(raw) => raw.to_string(),
        None => match &invocation.arguments {
            Value::Null => String::new(),
            v => v.to_string(),
        },
    };
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
