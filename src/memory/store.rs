//! 向量库：FlatIndex + 平行元数据，逐次写穿持久化
//!
//! 不变量：索引第 i 条向量对应元数据第 i 条记录，两者长度始终相等。
//! - add：先算嵌入（失败则不改动任何状态），再同步追加索引与元数据并整体重写到磁盘；
//!   写盘失败时回滚内存中的追加
//! - 启动：两个文件都缺失 / 任一不可读 → 空库；长度或维度不一致、元数据记录损坏 → 用完好记录重建。
//!   索引条数与原始元数据条数相同时复用已有向量，只为缺向量的记录计算嵌入；
//!   重建中有记录因嵌入失败被丢弃时不写盘，之后第一次写盘前先把原文件备份为 `*.bak`
//!
//! 磁盘布局：`<dir>/index.bin`（bincode）与 `<dir>/metadata.json`（JSON 数组）。
//! 不做跨进程加锁，多个进程同时写同一目录会互相覆盖。

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::llm::EmbeddingProvider;
use crate::memory::index::FlatIndex;
use crate::memory::MemoryKind;

pub const INDEX_FILE: &str = "index.bin";
pub const METADATA_FILE: &str = "metadata.json";

#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("kind '{0}' is not accepted by this store")]
    InvalidKind(MemoryKind),

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encode error: {0}")]
    Encode(String),
}

/// 可存入向量库的元数据记录
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// 用于计算嵌入的文本
    fn content(&self) -> &str;

    /// 去重键；None 表示每次 add 都追加
    fn key(&self) -> Option<&str> {
        None
    }
}

struct Inner<R> {
    index: FlatIndex,
    records: Vec<R>,
    /// 磁盘上的文件比内存多出未能嵌入的记录，覆盖前需备份
    dropped_on_load: bool,
}

impl<R> Inner<R> {
    fn empty(dimension: usize) -> Self {
        Self {
            index: FlatIndex::new(dimension),
            records: Vec::new(),
            dropped_on_load: false,
        }
    }
}

pub struct VectorStore<R> {
    dir: PathBuf,
    embedder: Arc<dyn EmbeddingProvider>,
    inner: RwLock<Inner<R>>,
}

impl<R: Record> VectorStore<R> {
    /// 打开（或新建）目录下的向量库；永不失败
    pub async fn open(
        dir: impl Into<PathBuf>,
        embedder: Arc<dyn EmbeddingProvider>,
        dimension: usize,
    ) -> Self {
        let dir = dir.into();
        let inner = load(&dir, embedder.as_ref(), dimension).await;
        tracing::info!(dir = %dir.display(), entries = inner.records.len(), "vector store opened");
        Self {
            dir,
            embedder,
            inner: RwLock::new(inner),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner<R>> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner<R>> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// (索引条数, 元数据条数)，正常情况下两者相等
    pub fn lengths(&self) -> (usize, usize) {
        let inner = self.read();
        (inner.index.len(), inner.records.len())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.read()
            .records
            .iter()
            .any(|r| r.key() == Some(key))
    }

    pub fn records(&self) -> Vec<R> {
        self.read().records.clone()
    }

    /// 满足条件的记录（保持插入顺序）
    pub fn records_where(&self, pred: impl Fn(&R) -> bool) -> Vec<R> {
        self.read()
            .records
            .iter()
            .filter(|r| pred(r))
            .cloned()
            .collect()
    }

    pub fn last_where(&self, pred: impl Fn(&R) -> bool) -> Option<R> {
        self.read().records.iter().rev().find(|r| pred(r)).cloned()
    }

    /// 插入一条记录；返回 Ok(false) 表示键已存在（未重新嵌入）
    pub async fn insert(&self, record: R) -> Result<bool, MemoryError> {
        if let Some(key) = record.key() {
            if self.contains_key(key) {
                tracing::debug!(key = %key, "already indexed, skipping");
                return Ok(false);
            }
        }

        let embedding = self
            .embedder
            .embed(record.content())
            .await
            .map_err(MemoryError::Embedding)?;

        let mut inner = self.write();
        if let Some(key) = record.key() {
            if inner.records.iter().any(|r| r.key() == Some(key)) {
                return Ok(false);
            }
        }
        inner.index.add(&embedding)?;
        inner.records.push(record);
        if inner.dropped_on_load {
            if let Err(e) = backup(&self.dir) {
                inner.index.pop();
                inner.records.pop();
                return Err(e);
            }
            inner.dropped_on_load = false;
        }
        if let Err(e) = persist(&self.dir, &inner) {
            inner.index.pop();
            inner.records.pop();
            return Err(e);
        }
        Ok(true)
    }

    /// 最近邻检索：返回 (记录, 平方 L2 距离)，距离升序
    pub async fn nearest(&self, query: &str, k: usize) -> Result<Vec<(R, f32)>, MemoryError> {
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let embedding = self
            .embedder
            .embed(query)
            .await
            .map_err(MemoryError::Embedding)?;
        let inner = self.read();
        let hits = inner.index.search(&embedding, k)?;
        Ok(hits
            .into_iter()
            .filter_map(|(i, d)| inner.records.get(i).map(|r| (r.clone(), d)))
            .collect())
    }
}

fn persist<R: Record>(dir: &Path, inner: &Inner<R>) -> Result<(), MemoryError> {
    std::fs::create_dir_all(dir)?;
    let index_bytes =
        bincode::serialize(&inner.index).map_err(|e| MemoryError::Encode(e.to_string()))?;
    let metadata = serde_json::to_vec_pretty(&inner.records)
        .map_err(|e| MemoryError::Encode(e.to_string()))?;
    write_replace(&dir.join(INDEX_FILE), &index_bytes)?;
    write_replace(&dir.join(METADATA_FILE), &metadata)?;
    Ok(())
}

/// 先写临时文件再 rename，避免留下半截文件
fn write_replace(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}

/// 把现有文件复制为 `index.bin.bak` / `metadata.json.bak`
fn backup(dir: &Path) -> Result<(), MemoryError> {
    for name in [INDEX_FILE, METADATA_FILE] {
        let path = dir.join(name);
        if path.exists() {
            let target = dir.join(format!("{name}.bak"));
            std::fs::copy(&path, &target)?;
            tracing::warn!(backup = %target.display(), "kept a copy of the previous store file");
        }
    }
    Ok(())
}

async fn load<R: Record>(dir: &Path, embedder: &dyn EmbeddingProvider, dimension: usize) -> Inner<R> {
    let index_path = dir.join(INDEX_FILE);
    let metadata_path = dir.join(METADATA_FILE);
    if !index_path.exists() && !metadata_path.exists() {
        return Inner::empty(dimension);
    }

    let index: Option<FlatIndex> = match std::fs::read(&index_path) {
        Ok(bytes) => bincode::deserialize(&bytes)
            .map_err(|e| tracing::warn!(error = %e, "index file unreadable"))
            .ok(),
        Err(e) => {
            tracing::warn!(error = %e, path = %index_path.display(), "index file missing");
            None
        }
    };
    let raw: Option<Vec<serde_json::Value>> = match std::fs::read(&metadata_path) {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map_err(|e| tracing::warn!(error = %e, "metadata file unreadable"))
            .ok(),
        Err(e) => {
            tracing::warn!(error = %e, path = %metadata_path.display(), "metadata file missing");
            None
        }
    };

    let (Some(index), Some(raw)) = (index, raw) else {
        tracing::warn!("starting with an empty store");
        return Inner::empty(dimension);
    };

    let total = raw.len();
    let reusable =
        index.is_well_formed() && index.dimension() == dimension && index.len() == total;
    let mut entries: Vec<(R, Option<Vec<f32>>)> = Vec::with_capacity(total);
    for (position, value) in raw.into_iter().enumerate() {
        match serde_json::from_value::<R>(value) {
            Ok(record) => {
                let vector = reusable
                    .then(|| index.vector(position))
                    .flatten()
                    .map(<[f32]>::to_vec);
                entries.push((record, vector));
            }
            Err(e) => tracing::warn!(position, error = %e, "dropping malformed metadata record"),
        }
    }

    if reusable && entries.len() == total {
        let records = entries.into_iter().map(|(r, _)| r).collect();
        return Inner {
            index,
            records,
            dropped_on_load: false,
        };
    }

    tracing::warn!(
        index_len = index.len(),
        metadata_len = total,
        valid_records = entries.len(),
        reuse_vectors = reusable,
        "index and metadata diverged, rebuilding"
    );
    let (mut inner, failed) = rebuild(entries, embedder, dimension).await;
    if failed > 0 {
        tracing::warn!(
            failed,
            kept = inner.records.len(),
            "records failed to embed, leaving store files untouched"
        );
        inner.dropped_on_load = true;
        return inner;
    }
    if let Err(e) = persist(dir, &inner) {
        tracing::warn!(error = %e, "failed to persist rebuilt store");
    }
    inner
}

/// 按原顺序重建；已有向量直接复用。返回 (结果, 嵌入失败的条数)
async fn rebuild<R: Record>(
    entries: Vec<(R, Option<Vec<f32>>)>,
    embedder: &dyn EmbeddingProvider,
    dimension: usize,
) -> (Inner<R>, usize) {
    let mut inner = Inner::empty(dimension);
    let mut failed = 0;
    for (record, vector) in entries {
        if let Some(key) = record.key() {
            if inner.records.iter().any(|r: &R| r.key() == Some(key)) {
                continue;
            }
        }
        let vector = match vector {
            Some(v) => v,
            None => match embedder.embed(record.content()).await {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(error = %e, "record failed to embed");
                    failed += 1;
                    continue;
                }
            },
        };
        match inner.index.add(&vector) {
            Ok(()) => inner.records.push(record),
            Err(e) => {
                tracing::warn!(error = %e, "record has a vector of the wrong dimension");
                failed += 1;
            }
        }
    }
    (inner, failed)
}
