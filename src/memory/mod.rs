//! 记忆层：向量化的情景记忆与文档记忆
//!
//! - **item**: MemoryItem / MemoryKind / MemoryFilter
//! - **index**: 精确 L2 平铺索引
//! - **store**: 通用向量库（索引 + 平行元数据，写穿持久化，加载校验/重建）
//! - **episodic**: 按会话的情景记忆
//! - **document**: 以 url 为键的页面索引

pub mod document;
pub mod episodic;
pub mod index;
pub mod item;
pub mod store;

use async_trait::async_trait;

pub use document::{content_hash, DocumentStore, IndexedDocument, IndexedPage, SearchHit};
pub use episodic::EpisodicStore;
pub use index::FlatIndex;
pub use item::{MemoryFilter, MemoryItem, MemoryKind};
pub use store::{MemoryError, Record, VectorStore};

/// 两种记忆共用的检索接口
///
/// 先取 overfetch_factor × top_k 个近邻，再依次按 kind、tags、session 过滤并截断到 top_k；
/// 因此结果可能少于 top_k。出错时返回空。
#[async_trait]
pub trait Retrieve: Send + Sync {
    async fn retrieve(&self, query: &str, top_k: usize, filter: &MemoryFilter) -> Vec<MemoryItem>;
}
