//! 文档记忆：以 url 为键索引网页正文
//!
//! 同一 url 只嵌入一次；content_hash 仅用于变更检测，不参与去重。

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::llm::EmbeddingProvider;
use crate::memory::store::{Record, VectorStore};
use crate::memory::{MemoryFilter, MemoryItem, MemoryKind, Retrieve};

/// 一篇已索引的页面（metadata.json 中的一条）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexedDocument {
    pub url: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub hash: String,
    #[serde(default, skip_serializing_if = "MemoryKind::is_fact")]
    pub kind: MemoryKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl IndexedDocument {
    pub fn new(url: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            url: url.into(),
            hash: content_hash(&content),
            content,
            timestamp: Utc::now(),
            kind: MemoryKind::Fact,
            tags: Vec::new(),
        }
    }

    fn into_item(self) -> MemoryItem {
        let mut tags = self.tags;
        tags.push(self.url);
        MemoryItem::new(self.content, self.kind)
            .at(self.timestamp)
            .with_tags(tags)
    }
}

impl Record for IndexedDocument {
    fn content(&self) -> &str {
        &self.content
    }

    fn key(&self) -> Option<&str> {
        Some(&self.url)
    }
}

/// 内容摘要（SHA-256，十六进制）
pub fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// search 的一条命中
#[derive(Clone, Debug, Serialize)]
pub struct SearchHit {
    pub url: String,
    pub content: String,
    pub distance: f32,
    pub timestamp: DateTime<Utc>,
    pub hash: String,
}

/// list 的一条
#[derive(Clone, Debug, Serialize)]
pub struct IndexedPage {
    pub url: String,
    pub timestamp: DateTime<Utc>,
    pub hash: String,
}

impl IndexedPage {
    /// 哈希的前 12 个字符，用于列表展示
    pub fn short_hash(&self) -> String {
        self.hash.chars().take(12).collect()
    }
}

pub struct DocumentStore {
    store: VectorStore<IndexedDocument>,
    overfetch_factor: usize,
}

impl DocumentStore {
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

    pub fn lengths(&self) -> (usize, usize) {
        self.store.lengths()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.store.contains_key(url)
    }

    /// 索引一个页面；url 已存在时直接返回 true
    pub async fn add(&self, url: &str, content: &str) -> bool {
        self.add_document(IndexedDocument::new(url, content)).await
    }

    pub async fn add_document(&self, doc: IndexedDocument) -> bool {
        if doc.url.trim().is_empty() || doc.content.trim().is_empty() {
            tracing::warn!(url = %doc.url, "refusing to index empty document");
            return false;
        }
        let url = doc.url.clone();
        match self.store.insert(doc).await {
            Ok(true) => {
                tracing::info!(url = %url, "document indexed");
                true
            }
            Ok(false) => true,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "document add failed");
                false
            }
        }
    }

    /// 批量写入：文本同时作为键与内容，非文档类型按 fact 处理；返回成功条数
    pub async fn bulk_add(&self, items: &[MemoryItem]) -> usize {
        let mut added = 0;
        for item in items {
            let mut doc = IndexedDocument::new(item.text.clone(), item.text.clone());
            doc.kind = if item.kind.is_document() {
                item.kind
            } else {
                MemoryKind::Fact
            };
            doc.tags = item.tags.clone();
            doc.timestamp = item.timestamp;
            if self.add_document(doc).await {
                added += 1;
            }
        }
        added
    }

    /// 相似度检索，距离升序；空库或出错时返回空
    pub async fn search(&self, query: &str, top_k: usize) -> Vec<SearchHit> {
        match self.store.nearest(query, top_k).await {
            Ok(hits) => hits
                .into_iter()
                .map(|(doc, distance)| SearchHit {
                    url: doc.url,
                    content: doc.content,
                    distance,
                    timestamp: doc.timestamp,
                    hash: doc.hash,
                })
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "document search failed");
                Vec::new()
            }
        }
    }

    /// 全部已索引页面；跳过缺少 url 或 hash 的记录
    pub fn list(&self) -> Vec<IndexedPage> {
        self.store
            .records()
            .into_iter()
            .filter(|d| !d.url.is_empty() && !d.hash.is_empty())
            .map(|d| IndexedPage {
                url: d.url,
                timestamp: d.timestamp,
                hash: d.hash,
            })
            .collect()
    }
}

#[async_trait]
impl Retrieve for DocumentStore {
    async fn retrieve(&self, query: &str, top_k: usize, filter: &MemoryFilter) -> Vec<MemoryItem> {
        let fetch = top_k.saturating_mul(self.overfetch_factor);
        let hits = match self.store.nearest(query, fetch).await {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(error = %e, "document retrieve failed");
                return Vec::new();
            }
        };
        hits.into_iter()
            .map(|(doc, _)| doc.into_item())
            .filter(|item| filter.matches(item))
            .take(top_k)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::HashingEmbedder;

    async fn open(dir: &std::path::Path) -> DocumentStore {
        DocumentStore::open(dir, Arc::new(HashingEmbedder::new(32)), 32, 2).await
    }

    #[test]
    fn test_content_hash_is_sha256_hex() {
        assert_eq!(
            content_hash(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_short_hash_counts_chars() {
        let page = |hash: &str| IndexedPage {
            url: "https://a.example".into(),
            timestamp: Utc::now(),
            hash: hash.into(),
        };
        assert_eq!(page(&content_hash("x")).short_hash().len(), 12);
        assert_eq!(page("abc").short_hash(), "abc");
        assert_eq!(page("ééééééééééééééé").short_hash(), "éééééééééééé");
    }

    #[tokio::test]
    async fn test_empty_content_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path()).await;
        assert!(!store.add("https://a.example", "   ").await);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_list_reports_url_and_hash() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path()).await;
        store.add("https://a.example", "alpha").await;
        store.add("https://b.example", "beta").await;
        let pages = store.list();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].url, "https://a.example");
        assert_eq!(pages[1].hash, content_hash("beta"));
    }

    #[tokio::test]
    async fn test_metadata_omits_default_kind() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path()).await;
        store.add("https://a.example", "alpha").await;
        let raw = std::fs::read_to_string(dir.path().join("metadata.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let record = &value[0];
        assert_eq!(record["url"], "https://a.example");
        assert!(record.get("kind").is_none());
        assert!(record.get("hash").is_some());
    }

    #[tokio::test]
    async fn test_bulk_add_keeps_document_kinds() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path()).await;
        let items = vec![
            MemoryItem::new("prefers short answers", MemoryKind::Preference),
            MemoryItem::new("a user query", MemoryKind::UserQuery),
        ];
        assert_eq!(store.bulk_add(&items).await, 2);
        let got = store
            .retrieve(
                "prefers short answers",
                5,
                &MemoryFilter::none().with_kind(MemoryKind::Preference),
            )
            .await;
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].text, "prefers short answers");
    }
}
