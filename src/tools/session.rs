//! 工具会话协议：list_tools / call_tool
//!
//! 响应形态在边界处显式枚举（单段 / 多段，文本 / JSON），由行动执行器统一归一化一次。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 工具描述（名称、说明、参数 JSON Schema）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input_schema: Value,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }

    fn property(&self, param: &str) -> Option<&Value> {
        self.input_schema.get("properties")?.get(param)
    }

    /// 参数是否声明为数组（`"type": "array"` 或 `["array", "null"]`）
    pub fn is_array_param(&self, param: &str) -> bool {
        self.property(param)
            .and_then(|p| p.get("type"))
            .map(|t| schema_type_is(t, "array"))
            .unwrap_or(false)
    }

    /// 数组参数的元素类型是否为字符串
    pub fn has_string_items(&self, param: &str) -> bool {
        self.property(param)
            .and_then(|p| p.get("items"))
            .and_then(|i| i.get("type"))
            .map(|t| schema_type_is(t, "string"))
            .unwrap_or(false)
    }

    /// 全部声明为数组的参数名
    pub fn array_params(&self) -> Vec<String> {
        self.input_schema
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| {
                props
                    .keys()
                    .filter(|k| self.is_array_param(k))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn schema_type_is(t: &Value, expected: &str) -> bool {
    match t {
        Value::String(s) => s == expected,
        Value::Array(types) => types.iter().any(|v| v.as_str() == Some(expected)),
        _ => false,
    }
}

/// 生成 prompt 中的工具目录（每行 `- name: description`）
pub fn describe_catalog(tools: &[ToolDescriptor]) -> String {
    tools
        .iter()
        .map(|t| {
            let description = if t.description.is_empty() {
                "No description"
            } else {
                t.description.as_str()
            };
            format!("- {}: {}", t.name, description)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// 响应中的一段内容
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ToolContent {
    Text(String),
    Json(Value),
}

impl ToolContent {
    pub fn text(&self) -> String {
        match self {
            ToolContent::Text(s) => s.clone(),
            ToolContent::Json(v) => v.to_string(),
        }
    }
}

/// call_tool 的响应：单段或多段
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolResponse {
    Single(ToolContent),
    Parts(Vec<ToolContent>),
}

impl ToolResponse {
    pub fn text(text: impl Into<String>) -> Self {
        ToolResponse::Single(ToolContent::Text(text.into()))
    }

    /// 拍平为一段文本：单段原样，多段按行拼接
    pub fn flatten(&self) -> String {
        match self {
            ToolResponse::Single(content) => content.text(),
            ToolResponse::Parts(parts) => match parts.as_slice() {
                [only] => only.text(),
                parts => parts
                    .iter()
                    .map(ToolContent::text)
                    .collect::<Vec<_>>()
                    .join("\n"),
            },
        }
    }
}

/// 工具会话：列出工具、按名调用
#[async_trait]
pub trait ToolSession: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, String>;

    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> Result<ToolResponse, String>;
}
