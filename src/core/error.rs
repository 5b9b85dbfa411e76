//! Agent 错误类型
//!
//! 外部服务（推理 / 嵌入 / 工具会话）的失败在组件边界转换为 AgentError，
//! 再由各组件降级为类型化的失败值（空结果、错误负载、兜底回答），不会越过主循环。

use thiserror::Error;

use crate::memory::MemoryError;

/// Agent 运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("LLM call timed out after {0}s")]
    LlmTimeout(u64),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Tool call parse error: {0}")]
    ToolCallParse(String),

    #[error("Tool '{0}' not found")]
    UnknownTool(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("Config error: {0}")]
    ConfigError(String),
}

impl From<config::ConfigError> for AgentError {
    fn from(e: config::ConfigError) -> Self {
        AgentError::ConfigError(e.to_string())
    }
}
