//! LLM 层：推理服务客户端（OpenAI 兼容 / Mock）、Reasoner 封装与嵌入提供方

pub mod embedding;
pub mod mock;
pub mod openai;
pub mod reasoner;
pub mod traits;

pub use embedding::{create_embedder_from_config, EmbeddingProvider, HashingEmbedder, OpenAiEmbedder};
pub use mock::{MockLlmClient, Scripted};
pub use openai::{OpenAiClient, TokenUsage, DEEPSEEK_BASE_URL};
pub use reasoner::Reasoner;
pub use traits::{LlmClient, Message, Role};
