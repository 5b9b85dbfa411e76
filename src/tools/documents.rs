//! 内置文档工具：在已索引网页中检索 / 列出已索引页面

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::memory::DocumentStore;
use crate::tools::Tool;

/// 检索结果中每条正文的最大字符数
const SNIPPET_CHARS: usize = 400;

pub struct SearchDocumentsTool {
    store: Arc<DocumentStore>,
    default_top_k: usize,
}

impl SearchDocumentsTool {
    pub fn new(store: Arc<DocumentStore>, default_top_k: usize) -> Self {
        Self {
            store,
            default_top_k: default_top_k.max(1),
        }
    }
}

#[async_trait]
impl Tool for SearchDocumentsTool {
    fn name(&self) -> &str {
        "search_documents"
    }

    fn description(&self) -> &str {
        "Semantic search over indexed web pages. Args: {\"query\": \"text\", \"top_k\": 5}"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "What to look for"},
                "top_k": {"type": "integer", "description": "Maximum number of results"}
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let query = args
            .get("query")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| "missing 'query'".to_string())?;
        let top_k = args
            .get("top_k")
            .and_then(|v| v.as_u64())
            .map(|k| k as usize)
            .unwrap_or(self.default_top_k);

        let results: Vec<Value> = self
            .store
            .search(query, top_k)
            .await
            .into_iter()
            .map(|hit| {
                json!({
                    "url": hit.url,
                    "content": snippet(&hit.content),
                    "distance": hit.distance,
                })
            })
            .collect();
        Ok(json!({ "query": query, "results": results }).to_string())
    }
}

pub struct ListDocumentsTool {
    store: Arc<DocumentStore>,
}

impl ListDocumentsTool {
    pub fn new(store: Arc<DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for ListDocumentsTool {
    fn name(&self) -> &str {
        "list_documents"
    }

    fn description(&self) -> &str {
        "List every indexed web page with its timestamp and content hash. No args."
    }

    async fn execute(&self, _args: Value) -> Result<String, String> {
        let items = serde_json::to_value(self.store.list()).map_err(|e| e.to_string())?;
        Ok(json!({ "items": items }).to_string())
    }
}

fn snippet(content: &str) -> String {
    if content.chars().count() > SNIPPET_CHARS {
        format!("{}...", content.chars().take(SNIPPET_CHARS).collect::<String>())
    } else {
        content.to_string()
    }
}
