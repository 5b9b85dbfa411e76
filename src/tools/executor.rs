//! 行动执行器
//!
//! execute(session, tools, plan_text)：解析 TOOL_CALL 行 → 按名在目录中精确查找 → 数组参数归一化 →
//! 经会话协议调用 → 拍平响应并尝试解析为 JSON。任何一步失败都不向上抛错，而是返回带 error 载荷的 ToolResult，
//! 主循环据此继续。每次调用输出结构化审计日志（JSON）。

use std::collections::HashMap;
use std::time::Instant;

use serde_json::{Map, Value};

use crate::core::AgentError;
use crate::react::protocol::{parse_literal_lexemes, parse_tool_call};
use crate::tools::result::{ToolOutput, ToolResult};
use crate::tools::session::{ToolDescriptor, ToolResponse, ToolSession};

/// 行动执行器（无状态；一次调用对应一次工具执行）
#[derive(Clone, Copy, Debug, Default)]
pub struct ActionExecutor;

impl ActionExecutor {
    pub fn new() -> Self {
        Self
    }

    pub async fn execute(
        &self,
        session: &dyn ToolSession,
        tools: &[ToolDescriptor],
        plan_text: &str,
    ) -> ToolResult {
        let start = Instant::now();
        let call = match parse_tool_call(plan_text) {
            Ok(call) => call,
            Err(e) => {
                audit("unknown", false, "parse_error", start, &Map::new());
                return failure("unknown", Map::new(), plan_text, &e);
            }
        };
        let name = call.name;
        let mut arguments = call.arguments;

        let outcome = invoke(session, tools, &name, &mut arguments, &call.raw_arguments).await;
        let (ok, label) = match &outcome {
            Ok(_) => (true, "ok"),
            Err(AgentError::UnknownTool(_)) => (false, "unknown_tool"),
            Err(_) => (false, "error"),
        };
        audit(&name, ok, label, start, &arguments);

        match outcome {
            Ok(response) => {
                let output = ToolOutput::from_text(response.flatten());
                tracing::info!(tool = %name, "tool execution completed");
                ToolResult {
                    tool_name: name,
                    arguments,
                    output,
                    raw: Some(response),
                }
            }
            Err(e) => failure(&name, arguments, plan_text, &e),
        }
    }
}

async fn invoke(
    session: &dyn ToolSession,
    tools: &[ToolDescriptor],
    name: &str,
    arguments: &mut Map<String, Value>,
    raw_arguments: &HashMap<String, String>,
) -> Result<ToolResponse, AgentError> {
    let descriptor = tools
        .iter()
        .find(|t| t.name == name)
        .ok_or_else(|| AgentError::UnknownTool(name.to_string()))?;
    coerce_list_params(descriptor, arguments, raw_arguments);
    let args_json = Value::Object(arguments.clone());
    tracing::info!(tool = %name, args = %args_json, "executing tool");
    session
        .call_tool(name, arguments.clone())
        .await
        .map_err(AgentError::ToolExecutionFailed)
}

fn failure(name: &str, arguments: Map<String, Value>, plan_text: &str, err: &AgentError) -> ToolResult {
    tracing::warn!(tool = %name, error = %err, "tool execution failed");
    ToolResult {
        tool_name: name.to_string(),
        arguments,
        output: ToolOutput::error(format!("Error executing {}: {}", plan_text.trim(), err)),
        raw: None,
    }
}

/// schema 声明为数组的参数统一转为列表
///
/// - 字符串：`"[a, 'b']"` 先按字面量解析，失败则去掉方括号按逗号切分并去引号；其他字符串成为单元素列表
/// - 其他非列表标量包成单元素列表
/// - 元素类型为 string 时，元素取自原始参数文本（数字保留原写法，如 `2101.00010`）
pub fn coerce_list_params(
    tool: &ToolDescriptor,
    arguments: &mut Map<String, Value>,
    raw_arguments: &HashMap<String, String>,
) {
    for param in tool.array_params() {
        let Some(value) = arguments.get_mut(&param) else {
            continue;
        };
        let string_items = tool.has_string_items(&param);
        let list: Vec<Value> = match &*value {
            Value::String(s) => string_to_list(s).into_iter().map(Value::String).collect(),
            Value::Null | Value::Object(_) => continue,
            current @ (Value::Array(_) | Value::Number(_) | Value::Bool(_)) if string_items => {
                match raw_arguments.get(&param).and_then(|raw| parse_literal_lexemes(raw)) {
                    Some(Value::Array(items)) => items.iter().map(|v| Value::String(scalar_text(v))).collect(),
                    Some(other) => vec![Value::String(scalar_text(&other))],
                    None => match current {
                        Value::Array(items) => items.iter().map(|v| Value::String(scalar_text(v))).collect(),
                        other => vec![Value::String(scalar_text(other))],
                    },
                }
            }
            Value::Array(_) => continue,
            other => vec![other.clone()],
        };
        tracing::debug!(param = %param, list = ?list, "reformatted list parameter");
        *value = Value::Array(list);
    }
}

fn string_to_list(s: &str) -> Vec<String> {
    let trimmed = s.trim();
    if trimmed.starts_with('[') && trimmed.ends_with(']') {
        if let Some(Value::Array(items)) = parse_literal_lexemes(trimmed) {
            return items.iter().map(scalar_text).collect();
        }
        return trimmed
            .trim_start_matches('[')
            .trim_end_matches(']')
            .split(',')
            .map(|item| item.trim().trim_matches(|c| c == '"' || c == '\'').to_string())
            .filter(|item| !item.is_empty())
            .collect();
    }
    vec![trimmed.to_string()]
}

fn scalar_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn audit(tool: &str, ok: bool, outcome: &str, start: Instant, args: &Map<String, Value>) {
    let audit = serde_json::json!({
        "event": "tool_audit",
        "tool": tool,
        "ok": ok,
        "outcome": outcome,
        "duration_ms": start.elapsed().as_millis() as u64,
        "args_preview": args_preview(args),
    });
    tracing::info!(audit = %audit.to_string(), "tool");
}

fn args_preview(args: &Map<String, Value>) -> String {
    let s = Value::Object(args.clone()).to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
