//! 研究助理主循环
//!
//! PERCEIVE → RETRIEVE → DECIDE → {ACT | FINALIZE} → 回到 PERCEIVE 或 STOP，最多 max_steps 轮。
//! 两股收敛压力保证终止：
//! - 重复检测：同一条原始 TOOL_CALL 行连续重复达到阈值时提前进入综合兜底
//! - 第二步起，检索到的记忆中已有 ≥2 条工具输出时，把查询改写为「请给出综合后的 FINAL_ANSWER」
//! 步数耗尽同样进入综合兜底；process_query 总是返回可读文本，从不以错误结束。
//! 可选 event_tx：向 CLI / 前端推送 StepUpdate / ToolCall / Observation / FinalAnswer 等事件。

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::config::{AgentSection, AppConfig};
use crate::core::{AgentPhase, LoopState, StopReason};
use crate::llm::Reasoner;
use crate::memory::{EpisodicStore, MemoryFilter, MemoryItem, MemoryKind, Retrieve};
use crate::react::decision::{DecisionEngine, PlanDecision};
use crate::react::perception::Perception;
use crate::react::synthesis::Synthesizer;
use crate::react::ReactEvent;
use crate::tools::{ActionExecutor, ToolSession};

/// Observation 预览最大字符数
const OBSERVATION_PREVIEW_CHARS: usize = 200;

/// 一次查询的最终输出
#[derive(Clone, Debug, Serialize)]
pub struct AgentResponse {
    pub response_text: String,
    /// 最后一次实际执行的工具
    pub tool_used: Option<String>,
    /// 兜底路径上为 {"reached_max_steps": true} 或 {"forced_by_repetition": true}
    pub data: Option<Value>,
    /// 实际执行的循环步数
    pub steps: usize,
    pub session_id: String,
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn send_event(tx: &Option<UnboundedSender<ReactEvent>>, ev: ReactEvent) {
    if let Some(t) = tx {
        let _ = t.send(ev);
    }
}

/// 研究助理：一个实例串行服务一个会话
pub struct ResearchAgent {
    perception: Perception,
    decision: DecisionEngine,
    executor: ActionExecutor,
    synthesizer: Synthesizer,
    reasoner: Reasoner,
    memory: Arc<EpisodicStore>,
    settings: AgentSection,
    /// 本实例发出过的原始工具调用行（不持久化）
    seen_tool_calls: HashSet<String>,
    event_tx: Option<UnboundedSender<ReactEvent>>,
}

impl ResearchAgent {
    pub fn new(reasoner: Reasoner, memory: Arc<EpisodicStore>, config: &AppConfig) -> Self {
        Self {
            perception: Perception::new(reasoner.clone()),
            decision: DecisionEngine::new(
                reasoner.clone(),
                &config.decision,
                config.agent.empty_collection_fields.clone(),
            ),
            executor: ActionExecutor::new(),
            synthesizer: Synthesizer::new(reasoner.clone()),
            reasoner,
            memory,
            settings: config.agent.clone(),
            seen_tool_calls: HashSet::new(),
            event_tx: None,
        }
    }

    pub fn with_event_tx(mut self, tx: UnboundedSender<ReactEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn memory(&self) -> &Arc<EpisodicStore> {
        &self.memory
    }

    /// 处理一个查询；session_id 为空时生成新的会话 id
    pub async fn process_query(
        &mut self,
        session: &dyn ToolSession,
        query: &str,
        session_id: Option<&str>,
    ) -> AgentResponse {
        let session_id = session_id
            .map(str::to_string)
            .unwrap_or_else(|| format!("session-{}", Uuid::new_v4()));
        let mut state = LoopState::new(session_id.clone(), query);
        tracing::info!(session = %session_id, query = %query, "processing query");

        self.memory
            .add(MemoryItem::user_query(query, &session_id))
            .await;

        let tools = match session.list_tools().await {
            Ok(tools) => tools,
            Err(e) => {
                tracing::warn!(error = %e, "list_tools failed, continuing without tools");
                Vec::new()
            }
        };
        let tool_names: Vec<String> = tools.iter().map(|t| t.name.clone()).collect();
        tracing::info!(count = tools.len(), "loaded tools");

        let max_steps = self.settings.max_steps;
        let mut last_tool: Option<String> = None;
        let mut reason = StopReason::BudgetExhausted;

        while state.step < max_steps {
            tracing::info!(step = state.step + 1, max_steps, "starting step");
            send_event(
                &self.event_tx,
                ReactEvent::StepUpdate {
                    step: state.step + 1,
                    max_steps,
                },
            );

            state.enter(AgentPhase::Perceive);
            let mut perception = self
                .perception
                .extract_with_tools(&state.current_query, &tool_names)
                .await;
            tracing::info!(intent = ?perception.intent, tool_hint = ?perception.tool_hint, "perception");
            send_event(
                &self.event_tx,
                ReactEvent::Perception {
                    intent: perception.intent.clone(),
                    tool_hint: perception.tool_hint.clone(),
                },
            );

            state.enter(AgentPhase::Retrieve);
            let memories = self
                .memory
                .retrieve(
                    &state.current_query,
                    self.settings.retrieve_top_k,
                    &MemoryFilter::session(&session_id),
                )
                .await;
            tracing::info!(count = memories.len(), "retrieved memories");

            let tool_outputs = memories
                .iter()
                .filter(|m| m.kind == MemoryKind::ToolOutput)
                .count();
            if state.step > 0 && tool_outputs >= 2 {
                state.current_query = format!(
                    "Original query: {}\nI've collected multiple pieces of information. Please provide a FINAL_ANSWER that synthesizes what we've learned so far.",
                    state.original_query
                );
                perception.user_input = state.current_query.clone();
                tracing::info!("enough evidence collected, asking for synthesis");
            }

            state.enter(AgentPhase::Decide);
            let plan = self.decision.plan(&perception, &memories, &tools).await;

            let (name, arguments) = match plan.decision {
                PlanDecision::FinalAnswer { text } => {
                    state.enter(AgentPhase::Finalize);
                    state.step += 1;
                    return self
                        .finish(&mut state, text, last_tool, None, StopReason::FinalAnswer)
                        .await;
                }
                PlanDecision::ToolCall { name, arguments } => (name, arguments),
            };

            let call_key = plan.line.trim().to_string();
            if self.seen_tool_calls.contains(&call_key) {
                state.consecutive_repeats += 1;
                tracing::warn!(
                    call = %call_key,
                    repeats = state.consecutive_repeats,
                    "repeated tool call"
                );
                send_event(
                    &self.event_tx,
                    ReactEvent::RepeatDetected {
                        call: call_key.clone(),
                        repeats: state.consecutive_repeats,
                    },
                );
                if state.consecutive_repeats >= self.settings.repeat_threshold {
                    tracing::warn!("too many repeated tool calls, forcing synthesis");
                    reason = StopReason::RepeatedToolCall;
                    break;
                }
            } else {
                state.consecutive_repeats = 0;
                self.seen_tool_calls.insert(call_key);
            }

            state.enter(AgentPhase::Act);
            send_event(
                &self.event_tx,
                ReactEvent::ToolCall {
                    tool: name,
                    args: Value::Object(arguments),
                },
            );
            let result = self.executor.execute(session, &tools, &plan.line).await;
            let useful = result.is_useful(&self.settings.empty_collection_fields);
            state.record_tool(&result.tool_name);
            last_tool = Some(result.tool_name.clone());

            let output_text = result.output.as_text();
            if !useful {
                tracing::info!(tool = %result.tool_name, "tool returned empty results");
            }
            self.memory
                .add(MemoryItem::tool_output(
                    truncate_chars(&output_text, self.settings.result_store_chars),
                    &result.tool_name,
                    &state.session_id,
                    &state.original_query,
                ))
                .await;
            send_event(
                &self.event_tx,
                ReactEvent::Observation {
                    tool: result.tool_name.clone(),
                    preview: truncate_chars(&output_text, OBSERVATION_PREVIEW_CHARS),
                    useful,
                },
            );

            state.current_query = if useful {
                format!(
                    "Original query: {}\nPrevious tool result: {}\nWhat should I do next?",
                    state.original_query,
                    truncate_chars(&output_text, self.settings.result_prompt_chars)
                )
            } else {
                format!(
                    "Original query: {}\nPrevious tool {} returned empty results. Try a different approach or provide a final answer.",
                    state.original_query, result.tool_name
                )
            };
            state.step += 1;
        }

        state.enter(AgentPhase::Synthesize);
        let label = match reason {
            StopReason::RepeatedToolCall => "forced_by_repetition",
            _ => "reached_max_steps",
        };
        send_event(
            &self.event_tx,
            ReactEvent::Synthesis {
                reason: label.to_string(),
            },
        );
        let items = self.memory.session_items(&state.session_id);
        let text = self
            .synthesizer
            .synthesize(&state.original_query, &items)
            .await;
        let mut data = Map::new();
        data.insert(label.to_string(), Value::Bool(true));
        let data = Some(Value::Object(data));
        self.finish(&mut state, text, last_tool, data, reason).await
    }

    async fn finish(
        &self,
        state: &mut LoopState,
        text: String,
        tool_used: Option<String>,
        data: Option<Value>,
        reason: StopReason,
    ) -> AgentResponse {
        self.memory
            .add(MemoryItem::agent_response(
                text.clone(),
                &state.session_id,
                &state.original_query,
            ))
            .await;
        send_event(&self.event_tx, ReactEvent::FinalAnswer { text: text.clone() });
        state.enter(AgentPhase::Stop);

        let (prompt_tokens, completion_tokens, total_tokens) = self.reasoner.token_usage();
        tracing::info!(
            session = %state.session_id,
            steps = state.step,
            ?reason,
            tools = ?state.tools_used,
            prompt_tokens,
            completion_tokens,
            total_tokens,
            "query finished"
        );

        AgentResponse {
            response_text: text,
            tool_used,
            data,
            steps: state.step,
            session_id: state.session_id.clone(),
        }
    }
}
