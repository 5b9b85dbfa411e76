//! 工具注册表
//!
//! 进程内工具实现 Tool trait（name / description / parameters_schema / execute），由 ToolRegistry 按名注册；
//! ToolRegistry 本身实现 ToolSession，主循环通过会话协议调用它，与远程工具会话无差别。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::tools::session::{ToolDescriptor, ToolResponse, ToolSession};

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认无参数
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String>;
}

/// 工具注册表：按名称存储 Arc<dyn Tool>
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// 工具名（按字母序）
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// 工具描述列表（按名称排序，保证 prompt 稳定）
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        let mut list: Vec<ToolDescriptor> = self
            .tools
            .values()
            .map(|tool| {
                ToolDescriptor::new(tool.name(), tool.description(), tool.parameters_schema())
            })
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }
}

#[async_trait]
impl ToolSession for ToolRegistry {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, String> {
        Ok(self.descriptors())
    }

    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> Result<ToolResponse, String> {
        let tool = self
            .get(name)
            .ok_or_else(|| format!("Unknown tool: {name}"))?;
        tool.execute(Value::Object(arguments))
            .await
            .map(ToolResponse::text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Upper;

    #[async_trait]
    impl Tool for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        fn description(&self) -> &str {
            "Uppercase text. Args: {\"text\": \"...\"}"
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }

        async fn execute(&self, args: Value) -> Result<String, String> {
            args.get("text")
                .and_then(Value::as_str)
                .map(str::to_uppercase)
                .ok_or_else(|| "missing text".to_string())
        }
    }

    #[tokio::test]
    async fn test_registry_as_session() {
        let mut registry = ToolRegistry::new();
        registry.register(Upper);
        let tools = registry.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "upper");

        let mut args = Map::new();
        args.insert("text".into(), json!("hi"));
        let response = registry.call_tool("upper", args).await.unwrap();
        assert_eq!(response.flatten(), "HI");

        assert!(registry.call_tool("upper", Map::new()).await.is_err());
        assert!(registry.call_tool("missing", Map::new()).await.is_err());
    }
}
