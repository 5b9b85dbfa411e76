//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `OWL__*` 覆盖（双下划线表示嵌套，如 `OWL__LLM__PROVIDER=mock`）。

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub embedding: EmbeddingSection,
    pub memory: MemorySection,
    pub agent: AgentSection,
    pub decision: DecisionSection,
    pub perception: PerceptionSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [llm] 段：推理服务后端选择与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：openai / deepseek / mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    /// 推理服务调用的外层超时（秒）；缺省或 0 表示不限时。嵌入与工具调用不受此影响
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            timeout_secs: None,
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

/// [embedding] 段：嵌入提供方与向量维度
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingSection {
    /// openai / hashing
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    pub base_url: Option<String>,
    /// 向量维度，必须大于 0
    #[serde(default = "default_dimension")]
    pub dimension: usize,
}

impl Default for EmbeddingSection {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            base_url: None,
            dimension: default_dimension(),
        }
    }
}

fn default_embedding_provider() -> String {
    "hashing".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_dimension() -> usize {
    768
}

/// [memory] 段：两个向量库的目录与检索过取倍数
#[derive(Debug, Clone, Deserialize)]
pub struct MemorySection {
    #[serde(default = "default_episodic_dir")]
    pub episodic_dir: PathBuf,
    #[serde(default = "default_document_dir")]
    pub document_dir: PathBuf,
    /// retrieve 时先取 overfetch_factor × top_k 个近邻再过滤
    #[serde(default = "default_overfetch_factor")]
    pub overfetch_factor: usize,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            episodic_dir: default_episodic_dir(),
            document_dir: default_document_dir(),
            overfetch_factor: default_overfetch_factor(),
        }
    }
}

fn default_episodic_dir() -> PathBuf {
    PathBuf::from("memory/episodic")
}

fn default_document_dir() -> PathBuf {
    PathBuf::from("faiss_index")
}

fn default_overfetch_factor() -> usize {
    2
}

/// [agent] 段：主循环步数预算、检索条数、重复阈值与截断长度
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    #[serde(default = "default_retrieve_top_k")]
    pub retrieve_top_k: usize,
    /// 连续重复同一工具调用达到此次数时强制进入综合回答
    #[serde(default = "default_repeat_threshold")]
    pub repeat_threshold: usize,
    /// 写入记忆的工具结果最大字符数
    #[serde(default = "default_result_store_chars")]
    pub result_store_chars: usize,
    /// 改写下一轮查询时引用的上一轮结果最大字符数
    #[serde(default = "default_result_prompt_chars")]
    pub result_prompt_chars: usize,
    /// 判定「空结果」时检查的集合字段（点号表示嵌套，如 network.nodes）
    #[serde(default = "default_empty_collection_fields")]
    pub empty_collection_fields: Vec<String>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            retrieve_top_k: default_retrieve_top_k(),
            repeat_threshold: default_repeat_threshold(),
            result_store_chars: default_result_store_chars(),
            result_prompt_chars: default_result_prompt_chars(),
            empty_collection_fields: default_empty_collection_fields(),
        }
    }
}

fn default_max_steps() -> usize {
    5
}

fn default_retrieve_top_k() -> usize {
    5
}

fn default_repeat_threshold() -> usize {
    2
}

fn default_result_store_chars() -> usize {
    1000
}

fn default_result_prompt_chars() -> usize {
    500
}

pub(crate) fn default_empty_collection_fields() -> Vec<String> {
    vec![
        "papers".into(),
        "results".into(),
        "items".into(),
        "network.nodes".into(),
    ]
}

/// [decision] 段：空结果时的备选工具与首轮关键词提示
#[derive(Debug, Clone, Deserialize)]
pub struct DecisionSection {
    #[serde(default = "default_fallbacks")]
    pub fallbacks: HashMap<String, String>,
    #[serde(default = "default_lexical_hints")]
    pub lexical_hints: Vec<LexicalHint>,
}

impl Default for DecisionSection {
    fn default() -> Self {
        Self {
            fallbacks: default_fallbacks(),
            lexical_hints: default_lexical_hints(),
        }
    }
}

/// [[decision.lexical_hints]]：查询中出现任一关键词时，首轮建议使用 tool
#[derive(Debug, Clone, Deserialize)]
pub struct LexicalHint {
    pub keywords: Vec<String>,
    pub tool: String,
}

fn default_fallbacks() -> HashMap<String, String> {
    HashMap::from([(
        "citation_network_analyzer".to_string(),
        "concept_extractor".to_string(),
    )])
}

fn default_lexical_hints() -> Vec<LexicalHint> {
    vec![
        LexicalHint {
            keywords: vec!["papers".into(), "research".into()],
            tool: "paper_retrieval_tool".into(),
        },
        LexicalHint {
            keywords: vec!["domain".into(), "connection".into(), "relation".into()],
            tool: "cross_domain_connector".into(),
        },
    ]
}

/// [perception] 段：始终拒绝索引的域名
#[derive(Debug, Clone, Deserialize)]
pub struct PerceptionSection {
    #[serde(default = "default_excluded_domains")]
    pub excluded_domains: Vec<String>,
}

impl Default for PerceptionSection {
    fn default() -> Self {
        Self {
            excluded_domains: default_excluded_domains(),
        }
    }
}

pub(crate) fn default_excluded_domains() -> Vec<String> {
    vec![
        "mail.google.com".into(),
        "web.whatsapp.com".into(),
        "banking.com".into(),
    ]
}

/// 从 config 目录加载配置，环境变量 OWL__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 OWL__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("OWL")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    let cfg: AppConfig = c.try_deserialize()?;
    if cfg.embedding.dimension == 0 {
        return Err(config::ConfigError::Message(
            "embedding.dimension must be greater than 0".to_string(),
        ));
    }
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_loop_constants() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.agent.max_steps, 5);
        assert_eq!(cfg.agent.repeat_threshold, 2);
        assert_eq!(cfg.memory.overfetch_factor, 2);
        assert_eq!(cfg.agent.result_store_chars, 1000);
        assert_eq!(cfg.llm.timeout_secs, None);
    }

    #[test]
    fn test_missing_timeout_line_means_no_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[llm]\nprovider = \"mock\"\n").unwrap();
        let cfg: AppConfig = config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(cfg.llm.timeout_secs, None);
    }

    #[test]
    fn test_zero_dimension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[embedding]\ndimension = 0\n").unwrap();
        let err = load_config(Some(path)).unwrap_err();
        assert!(err.to_string().contains("embedding.dimension"));
    }

    #[test]
    fn test_load_explicit_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "[agent]\nmax_steps = 3\n\n[llm]\nprovider = \"mock\"\n",
        )
        .unwrap();
        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.agent.max_steps, 3);
        assert_eq!(cfg.llm.provider, "mock");
        assert_eq!(cfg.agent.retrieve_top_k, 5);
    }
}
