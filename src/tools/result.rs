//! 行动结果：{tool_name, arguments, output, raw}
//!
//! output 要么是解析后的结构化值（文本看起来是 JSON 对象且能解析），要么是原始字符串，二者不会同时存在。

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::tools::session::ToolResponse;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ToolOutput {
    Structured(Value),
    Text(String),
}

impl ToolOutput {
    /// 文本首尾为 `{`/`}` 且能解析时转为结构化值
    pub fn from_text(text: String) -> Self {
        let trimmed = text.trim();
        if trimmed.starts_with('{') && trimmed.ends_with('}') {
            if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
                return ToolOutput::Structured(value);
            }
        }
        ToolOutput::Text(text)
    }

    pub fn error(message: impl Into<String>) -> Self {
        ToolOutput::Structured(json!({ "error": message.into() }))
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            ToolOutput::Structured(Value::Object(map)) if map.len() == 1 => {
                map.get("error").and_then(Value::as_str)
            }
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error_message().is_some()
    }

    /// 写入记忆 / prompt 时使用的文本形式
    pub fn as_text(&self) -> String {
        match self {
            ToolOutput::Structured(v) => v.to_string(),
            ToolOutput::Text(s) => s.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ToolResult {
    pub tool_name: String,
    pub arguments: Map<String, Value>,
    pub output: ToolOutput,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<ToolResponse>,
}

impl ToolResult {
    /// 结果是否「有用」：非错误、非空，且所列集合字段都不是空列表
    ///
    /// fields 中的点号表示嵌套（network.nodes）。
    pub fn is_useful(&self, fields: &[String]) -> bool {
        match &self.output {
            _ if self.output.is_error() => false,
            ToolOutput::Structured(Value::Null) => false,
            ToolOutput::Structured(Value::Array(items)) => !items.is_empty(),
            ToolOutput::Structured(v @ Value::Object(map)) => {
                !map.is_empty() && !fields.iter().any(|f| is_empty_list(lookup(v, f)))
            }
            ToolOutput::Structured(_) => true,
            ToolOutput::Text(text) => !text.trim().is_empty() && !text_reports_empty(text, fields),
        }
    }
}

fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |v, key| v.get(key))
}

fn is_empty_list(value: Option<&Value>) -> bool {
    matches!(value, Some(Value::Array(items)) if items.is_empty())
}

/// 文本形式的结果里是否出现 `"papers": []` / `'papers': []` 之类的空集合字段
pub fn text_reports_empty(text: &str, fields: &[String]) -> bool {
    fields.iter().any(|field| {
        let key = field.rsplit('.').next().unwrap_or(field);
        let pattern = format!(r#"["']{}["']\s*:\s*\[\s*\]"#, regex::escape(key));
        regex::Regex::new(&pattern)
            .map(|re| re.is_match(text))
            .unwrap_or(false)
    })
}
