//! 主循环状态：阶段与单次查询的显式上下文
//!
//! 会话 id、步数、当前（可能被改写的）查询、重复计数都放在 LoopState 中，
//! 由 Agent 实例持有并沿流水线传递，不使用任何全局可变状态。

use serde::Serialize;

/// 主循环阶段：PERCEIVE → RETRIEVE → DECIDE → {ACT | FINALIZE} → 回到 PERCEIVE 或 STOP
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentPhase {
    Perceive,
    Retrieve,
    Decide,
    Act,
    Finalize,
    Synthesize,
    Stop,
}

/// 终止原因
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// 决策给出 FINAL_ANSWER
    FinalAnswer,
    /// 步数预算耗尽，走综合兜底
    BudgetExhausted,
    /// 连续重复工具调用，提前强制综合
    RepeatedToolCall,
}

/// 单次 process_query 的循环上下文
#[derive(Clone, Debug)]
pub struct LoopState {
    pub session_id: String,
    pub original_query: String,
    /// 下一轮送入 Perception 的查询文本（每轮可能被改写）
    pub current_query: String,
    pub step: usize,
    pub phase: AgentPhase,
    pub consecutive_repeats: usize,
    pub tools_used: Vec<String>,
}

impl LoopState {
    pub fn new(session_id: impl Into<String>, query: impl Into<String>) -> Self {
        let query = query.into();
        Self {
            session_id: session_id.into(),
            original_query: query.clone(),
            current_query: query,
            step: 0,
            phase: AgentPhase::Perceive,
            consecutive_repeats: 0,
            tools_used: Vec::new(),
        }
    }

    pub fn enter(&mut self, phase: AgentPhase) {
        tracing::debug!(session = %self.session_id, step = self.step, ?phase, "phase");
        self.phase = phase;
    }

    /// 记录一次实际执行的工具（去重保序）
    pub fn record_tool(&mut self, tool: &str) {
        if !self.tools_used.iter().any(|t| t == tool) {
            self.tools_used.push(tool.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state_starts_at_perceive() {
        let state = LoopState::new("s1", "find papers");
        assert_eq!(state.phase, AgentPhase::Perceive);
        assert_eq!(state.current_query, state.original_query);
        assert_eq!(state.step, 0);
    }

    #[test]
    fn test_record_tool_dedups() {
        let mut state = LoopState::new("s1", "q");
        state.record_tool("a");
        state.record_tool("b");
        state.record_tool("a");
        assert_eq!(state.tools_used, vec!["a".to_string(), "b".to_string()]);
    }
}
