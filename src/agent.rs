//! Agent 运行时装配
//!
//! 从配置构建推理服务、嵌入提供方、两个向量库与内置工具：
//! create_agent_components 返回可多次使用的组件集合，process_message 对单条输入跑一次主循环。

use std::sync::Arc;

use crate::config::AppConfig;
use crate::llm::{
    create_embedder_from_config, EmbeddingProvider, LlmClient, MockLlmClient, OpenAiClient,
    Reasoner, DEEPSEEK_BASE_URL,
};
use crate::memory::{DocumentStore, EpisodicStore};
use crate::react::{AgentResponse, PagePerception, PageRejection, ResearchAgent};
use crate::tools::{ListDocumentsTool, SearchDocumentsTool, ToolRegistry};

fn env_key(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|k| !k.trim().is_empty())
}

/// 按 [llm].provider 选择后端；缺少 API Key 时退回 Mock
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    match provider.as_str() {
        "mock" => {
            tracing::info!("Using Mock LLM");
            Arc::new(MockLlmClient::default())
        }
        "deepseek" => match env_key("DEEPSEEK_API_KEY").or_else(|| env_key("OPENAI_API_KEY")) {
            Some(key) => {
                let model = if cfg.llm.model.starts_with("gpt-") {
                    "deepseek-chat".to_string()
                } else {
                    cfg.llm.model.clone()
                };
                let base = cfg.llm.base_url.as_deref().unwrap_or(DEEPSEEK_BASE_URL);
                tracing::info!("Using DeepSeek LLM ({})", model);
                Arc::new(OpenAiClient::new(Some(base), &model, Some(&key)))
            }
            None => {
                tracing::warn!("DEEPSEEK_API_KEY not set, using Mock LLM");
                Arc::new(MockLlmClient::default())
            }
        },
        other => {
            if other != "openai" {
                tracing::warn!(provider = %other, "unknown LLM provider, trying OpenAI");
            }
            match env_key("OPENAI_API_KEY") {
                Some(key) => {
                    tracing::info!("Using OpenAI LLM ({})", cfg.llm.model);
                    Arc::new(OpenAiClient::new(
                        cfg.llm.base_url.as_deref(),
                        &cfg.llm.model,
                        Some(&key),
                    ))
                }
                None => {
                    tracing::warn!("OPENAI_API_KEY not set, using Mock LLM");
                    Arc::new(MockLlmClient::default())
                }
            }
        }
    }
}

/// 预构建的组件：推理服务、嵌入、两个向量库、网页感知
pub struct AgentComponents {
    pub config: AppConfig,
    pub reasoner: Reasoner,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub episodic: Arc<EpisodicStore>,
    pub documents: Arc<DocumentStore>,
    pub pages: PagePerception,
}

/// 从配置创建组件；LLM 与嵌入后端由配置和环境变量决定
pub async fn create_agent_components(cfg: AppConfig) -> AgentComponents {
    let llm = create_llm_from_config(&cfg);
    let embedder = create_embedder_from_config(&cfg.embedding);
    create_agent_components_with(cfg, llm, embedder).await
}

/// 使用指定的 LLM 与嵌入提供方创建组件（测试与嵌入式调用）
pub async fn create_agent_components_with(
    cfg: AppConfig,
    llm: Arc<dyn LlmClient>,
    embedder: Arc<dyn EmbeddingProvider>,
) -> AgentComponents {
    let dimension = cfg.embedding.dimension;
    let overfetch = cfg.memory.overfetch_factor;
    let episodic = EpisodicStore::open(
        cfg.memory.episodic_dir.clone(),
        embedder.clone(),
        dimension,
        overfetch,
    )
    .await;
    let documents = DocumentStore::open(
        cfg.memory.document_dir.clone(),
        embedder.clone(),
        dimension,
        overfetch,
    )
    .await;
    AgentComponents {
        reasoner: Reasoner::new(llm).with_timeout_secs(cfg.llm.timeout_secs),
        embedder,
        episodic: Arc::new(episodic),
        documents: Arc::new(documents),
        pages: PagePerception::new(cfg.perception.excluded_domains.clone()),
        config: cfg,
    }
}

impl AgentComponents {
    /// 新建一个研究助理实例（重复检测集合随实例新建）
    pub fn agent(&self) -> ResearchAgent {
        ResearchAgent::new(self.reasoner.clone(), self.episodic.clone(), &self.config)
    }

    /// 进程内内置工具：search_documents / list_documents
    pub fn builtin_tools(&self) -> ToolRegistry {
        let mut tools = ToolRegistry::new();
        tools.register(SearchDocumentsTool::new(
            self.documents.clone(),
            self.config.agent.retrieve_top_k,
        ));
        tools.register(ListDocumentsTool::new(self.documents.clone()));
        tools
    }

    /// 校验、清洗并索引一个网页；Ok(false) 表示写入失败（如嵌入出错）
    pub async fn index_page(&self, url: &str, html: &str) -> Result<bool, PageRejection> {
        let text = self.pages.inspect(url, html)?;
        Ok(self.documents.add(url, &text).await)
    }
}

/// 对单条用户输入跑一次主循环（使用内置工具）
pub async fn process_message(
    components: &AgentComponents,
    query: &str,
    session_id: Option<&str>,
) -> AgentResponse {
    let tools = components.builtin_tools();
    let mut agent = components.agent();
    agent.process_query(&tools, query, session_id).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_provider_needs_no_key() {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = "mock".into();
        let llm = create_llm_from_config(&cfg);
        assert_eq!(llm.token_usage(), (0, 0, 0));
    }

    #[tokio::test]
    async fn test_index_page_rejects_and_accepts() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = AppConfig::default();
        cfg.embedding.dimension = 32;
        cfg.memory.episodic_dir = dir.path().join("episodic");
        cfg.memory.document_dir = dir.path().join("docs");
        let components = create_agent_components_with(
            cfg,
            Arc::new(MockLlmClient::default()),
            Arc::new(crate::llm::HashingEmbedder::new(32)),
        )
        .await;

        assert_eq!(
            components
                .index_page("https://web.whatsapp.com/", "<p>chat</p>")
                .await,
            Err(PageRejection::ExcludedDomain)
        );
        assert_eq!(
            components
                .index_page("https://example.org/a", "<p>Ownership rules</p>")
                .await,
            Ok(true)
        );
        assert!(components.documents.contains("https://example.org/a"));
        assert_eq!(components.builtin_tools().tool_names(), vec!["list_documents", "search_documents"]);
    }
}
