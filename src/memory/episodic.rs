//! 情景记忆：按会话记录用户问题、工具输出与智能体回答，支持相似度检索

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;

use crate::llm::{EmbeddingProvider, Message};
use crate::memory::store::{MemoryError, Record, VectorStore};
use crate::memory::{MemoryFilter, MemoryItem, MemoryKind, Retrieve};

impl Record for MemoryItem {
    fn content(&self) -> &str {
        &self.text
    }
}

pub struct EpisodicStore {
    store: VectorStore<MemoryItem>,
    overfetch_factor: usize,
}

impl EpisodicStore {
    pub async fn open(
        dir: impl Into<PathBuf>,
        embedder: Arc<dyn EmbeddingProvider>,
        dimension: usize,
        overfetch_factor: usize,
    ) -> Self {
        Self {
            store: VectorStore::open(dir, embedder, dimension).await,
            overfetch_factor: overfetch_factor.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// (索引条数, 元数据条数)
    pub fn lengths(&self) -> (usize, usize) {
        self.store.lengths()
    }

    /// 写入一条情景记忆；非情景类型返回 InvalidKind
    ///
    /// 同一会话内时间戳严格递增：若新条目不晚于该会话最后一条，则顺延 1 微秒。
    pub async fn try_add(&self, mut item: MemoryItem) -> Result<(), MemoryError> {
        if !item.kind.is_episodic() {
            return Err(MemoryError::InvalidKind(item.kind));
        }
        if let Some(ref sid) = item.session_id {
            let last = self
                .store
                .last_where(|r| r.session_id.as_deref() == Some(sid.as_str()));
            if let Some(last) = last {
                if item.timestamp <= last.timestamp {
                    item.timestamp = last.timestamp + Duration::microseconds(1);
                }
            }
        }
        self.store.insert(item).await.map(|_| ())
    }

    /// 写入失败只记日志并返回 false，不影响已有状态
    pub async fn add(&self, item: MemoryItem) -> bool {
        let kind = item.kind;
        match self.try_add(item).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, kind = %kind, "episodic add failed");
                false
            }
        }
    }

    /// 相似度检索 (文本, 距离)；出错时返回空
    pub async fn search(&self, query: &str, top_k: usize) -> Vec<(String, f32)> {
        match self.store.nearest(query, top_k).await {
            Ok(hits) => hits.into_iter().map(|(item, d)| (item.text, d)).collect(),
            Err(e) => {
                tracing::warn!(error = %e, "episodic search failed");
                Vec::new()
            }
        }
    }

    /// 某会话的全部条目，按写入顺序
    pub fn session_items(&self, session_id: &str) -> Vec<MemoryItem> {
        self.store
            .records_where(|r| r.session_id.as_deref() == Some(session_id))
    }

    /// 会话中的问答轮次，转为 LLM 消息（user_query → user，agent_response → assistant）
    pub fn conversation_history(&self, session_id: &str) -> Vec<Message> {
        self.session_items(session_id)
            .into_iter()
            .filter_map(|item| match item.kind {
                MemoryKind::UserQuery => Some(Message::user(item.text)),
                MemoryKind::AgentResponse => Some(Message::assistant(item.text)),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Retrieve for EpisodicStore {
    async fn retrieve(&self, query: &str, top_k: usize, filter: &MemoryFilter) -> Vec<MemoryItem> {
        let fetch = top_k.saturating_mul(self.overfetch_factor);
        let hits = match self.store.nearest(query, fetch).await {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(error = %e, "episodic retrieve failed");
                return Vec::new();
            }
        };
        hits.into_iter()
            .map(|(item, _)| item)
            .filter(|item| filter.matches(item))
            .take(top_k)
            .collect()
    }
}
