//! 认知层：感知、决策、文本协议、综合兜底与主循环

pub mod decision;
pub mod events;
pub mod loop_;
pub mod perception;
pub mod protocol;
pub mod synthesis;

pub use decision::{parse_plan, DecisionEngine, Plan, PlanDecision};
pub use events::ReactEvent;
pub use loop_::{AgentResponse, ResearchAgent};
pub use perception::{PagePerception, PageRejection, Perception, PerceptionResult};
pub use protocol::{parse_tool_call, ToolCall};
pub use synthesis::Synthesizer;
