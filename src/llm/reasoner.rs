//! 推理服务：generate(prompt) -> text
//!
//! 对 LlmClient 的薄封装：单条 user 消息，带可选的外层超时（只作用于推理调用）。

use std::sync::Arc;
use std::time::Duration;

use crate::core::AgentError;
use crate::llm::{LlmClient, Message};

#[derive(Clone)]
pub struct Reasoner {
    llm: Arc<dyn LlmClient>,
    timeout: Option<Duration>,
}

impl Reasoner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm, timeout: None }
    }

    /// 设置外层超时；None 或 0 表示不限时
    pub fn with_timeout_secs(mut self, secs: Option<u64>) -> Self {
        self.timeout = secs.filter(|s| *s > 0).map(Duration::from_secs);
        self
    }

    pub async fn generate(&self, prompt: &str) -> Result<String, AgentError> {
        let messages = [Message::user(prompt)];
        let call = self.llm.complete(&messages);
        let reply = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| AgentError::LlmTimeout(limit.as_secs()))?,
            None => call.await,
        };
        reply.map_err(AgentError::LlmError)
    }

    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }
}
