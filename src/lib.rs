//! Owl - Rust 研究助理智能体
//!
//! 模块划分：
//! - **agent**: 运行时装配（LLM / 嵌入 / 向量库 / 内置工具）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型与主循环状态
//! - **llm**: 推理服务客户端（OpenAI 兼容 / DeepSeek / Mock）、Reasoner、嵌入提供方
//! - **memory**: 向量化情景记忆与文档记忆
//! - **observability**: 日志初始化
//! - **react**: 感知、决策、文本协议、综合兜底与主循环
//! - **tools**: 工具会话协议、注册表、行动执行器、内置文档工具

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod tools;

pub use agent::{create_agent_components, process_message, AgentComponents};
pub use react::{AgentResponse, ResearchAgent};
