//! Mock LLM 客户端（用于测试与离线运行，无需 API）
//!
//! 按顺序返回预先排好的回复；队列耗尽后返回默认回复。记录每次收到的 prompt，便于断言上下文内容。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, Message};

/// 队列中的一条脚本：正常回复或模拟失败
#[derive(Debug, Clone)]
pub enum Scripted {
    Reply(String),
    Fail(String),
}

/// Mock 客户端：脚本化回复
#[derive(Debug)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<Scripted>>,
    default_reply: String,
    prompts: Mutex<Vec<String>>,
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new(Vec::<String>::new())
    }
}

impl MockLlmClient {
    pub fn new<S: Into<String>>(replies: impl IntoIterator<Item = S>) -> Self {
        Self {
            script: Mutex::new(
                replies
                    .into_iter()
                    .map(|r| Scripted::Reply(r.into()))
                    .collect(),
            ),
            default_reply: "FINAL_ANSWER: (mock) no further information available.".to_string(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_script(script: impl IntoIterator<Item = Scripted>) -> Self {
        let mut mock = Self::default();
        mock.script = Mutex::new(script.into_iter().collect());
        mock
    }

    pub fn with_default_reply(mut self, reply: impl Into<String>) -> Self {
        self.default_reply = reply.into();
        self
    }

    /// 目前为止收到的全部 prompt（取每次调用的最后一条消息）
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let last = messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(last);

        let next = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match next {
            Some(Scripted::Reply(r)) => Ok(r),
            Some(Scripted::Fail(e)) => Err(e),
            None => Ok(self.default_reply.clone()),
        }
    }
}
