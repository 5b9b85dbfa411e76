//! 核心层：错误类型与主循环状态

pub mod error;
pub mod state;

pub use error::AgentError;
pub use state::{AgentPhase, LoopState, StopReason};
