//! 主循环过程事件：供 CLI / 前端实时展示感知、工具调用、观察与最终回答

use serde::Serialize;

/// 单步过程事件（可序列化为 JSON）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReactEvent {
    /// 步数更新（当前第几步）
    StepUpdate { step: usize, max_steps: usize },
    /// 感知结果
    Perception {
        intent: Option<String>,
        tool_hint: Option<String>,
    },
    /// 调用工具
    ToolCall {
        tool: String,
        args: serde_json::Value,
    },
    /// 工具返回（预览，避免过长）
    Observation {
        tool: String,
        preview: String,
        useful: bool,
    },
    /// 检测到重复的工具调用
    RepeatDetected { call: String, repeats: usize },
    /// 进入综合回答（步数耗尽或重复调用）
    Synthesis { reason: String },
    /// 最终回答
    FinalAnswer { text: String },
}
