//! 决策层：根据感知结果、检索到的记忆与工具目录给出下一步（工具调用或最终回答）
//!
//! 引擎只通过 prompt 中的提示施加倾向（空结果警告、备选工具、多工具后建议综合、首轮关键词提示），
//! 最终选择交给推理服务。回复中取第一条合法行；没有合法行时整段回复作为最终回答，永远不会产出无法解析的工具调用。

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::config::{DecisionSection, LexicalHint};
use crate::llm::Reasoner;
use crate::memory::{MemoryItem, MemoryKind};
use crate::react::perception::PerceptionResult;
use crate::react::protocol::{self, FINAL_ANSWER_PREFIX};
use crate::tools::{describe_catalog, text_reports_empty, ToolDescriptor};

/// 一轮决策的输出
#[derive(Clone, Debug, PartialEq)]
pub enum PlanDecision {
    ToolCall {
        name: String,
        arguments: Map<String, Value>,
    },
    FinalAnswer {
        text: String,
    },
}

/// 决策结果：结构化决策 + 原始协议行（行动执行器与重复检测使用原始行）
#[derive(Clone, Debug, PartialEq)]
pub struct Plan {
    pub decision: PlanDecision,
    pub line: String,
}

impl Plan {
    pub fn final_answer(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            line: format!("{FINAL_ANSWER_PREFIX} {text}"),
            decision: PlanDecision::FinalAnswer { text },
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self.decision, PlanDecision::FinalAnswer { .. })
    }
}

/// 从推理服务回复中选出决策
///
/// - 第一条 `TOOL_CALL:` / `FINAL_ANSWER:` 行胜出；无法解析的 TOOL_CALL 行被跳过
/// - FINAL_ANSWER 行之后的内容视为回答的续行
/// - 都没有时整段回复即最终回答
pub fn parse_plan(reply: &str) -> Plan {
    let lines: Vec<&str> = reply.lines().collect();
    for (i, raw) in lines.iter().enumerate() {
        let line = raw.trim();
        if protocol::is_tool_call(line) {
            match protocol::parse_tool_call(line) {
                Ok(call) => {
                    return Plan {
                        decision: PlanDecision::ToolCall {
                            name: call.name,
                            arguments: call.arguments,
                        },
                        line: line.to_string(),
                    }
                }
                Err(e) => {
                    tracing::warn!(line = %line, error = %e, "skipping malformed tool call line");
                    continue;
                }
            }
        }
        if protocol::is_final_answer(line) {
            let mut text = protocol::format_final_answer(line);
            let rest = lines[i + 1..].join("\n");
            let rest = rest.trim();
            if !rest.is_empty() {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(rest);
            }
            return Plan::final_answer(text);
        }
    }
    Plan::final_answer(reply.trim())
}

/// 检索记忆整理出的上下文
#[derive(Debug, Default)]
struct MemoryContext {
    text: String,
    tools_used: Vec<String>,
    empty_tools: Vec<String>,
    has_results: bool,
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|v| v == value) {
        list.push(value.to_string());
    }
}

fn looks_like_error(text: &str) -> bool {
    let t = text.trim_start();
    t.starts_with("{\"error\"") || t.starts_with("{'error'")
}

fn summarize_memories(memories: &[MemoryItem], empty_fields: &[String]) -> MemoryContext {
    let mut ctx = MemoryContext::default();
    let mut lines = Vec::new();
    for item in memories {
        match (&item.kind, &item.tool_name) {
            (MemoryKind::ToolOutput, Some(tool)) => {
                push_unique(&mut ctx.tools_used, tool);
                if looks_like_error(&item.text) || text_reports_empty(&item.text, empty_fields) {
                    push_unique(&mut ctx.empty_tools, tool);
                    lines.push(format!(
                        "- Previous {tool} returned EMPTY RESULTS. Use a different tool."
                    ));
                } else {
                    ctx.has_results = true;
                    lines.push(format!("- Previous {tool} result: {}", item.text));
                }
            }
            _ => lines.push(format!("- {}", item.text)),
        }
    }
    ctx.text = if lines.is_empty() {
        "None available".to_string()
    } else {
        lines.join("\n")
    };
    ctx
}

pub struct DecisionEngine {
    reasoner: Reasoner,
    fallbacks: HashMap<String, String>,
    lexical_hints: Vec<LexicalHint>,
    empty_fields: Vec<String>,
}

impl DecisionEngine {
    pub fn new(reasoner: Reasoner, section: &DecisionSection, empty_fields: Vec<String>) -> Self {
        Self {
            reasoner,
            fallbacks: section.fallbacks.clone(),
            lexical_hints: section.lexical_hints.clone(),
            empty_fields,
        }
    }

    pub async fn plan(
        &self,
        perception: &PerceptionResult,
        memories: &[MemoryItem],
        tools: &[ToolDescriptor],
    ) -> Plan {
        let prompt = self.build_prompt(perception, memories, tools);
        match self.reasoner.generate(&prompt).await {
            Ok(reply) => {
                let plan = parse_plan(&reply);
                tracing::info!(plan = %plan.line, "generated plan");
                plan
            }
            Err(e) => {
                tracing::warn!(error = %e, "plan generation failed");
                Plan::final_answer("I encountered an error while processing your request.")
            }
        }
    }

    /// 启发式提示；只提及目录中存在的工具
    fn hints(&self, ctx: &MemoryContext, perception: &PerceptionResult, tools: &[ToolDescriptor]) -> Vec<String> {
        let available = |name: &str| tools.iter().any(|t| t.name == name);
        let mut hints = Vec::new();

        if ctx.has_results {
            hints.push("IMPORTANT: If you have enough information from previous tool calls to answer the query, return a FINAL_ANSWER directly rather than making additional tool calls.".to_string());
        }
        if !ctx.empty_tools.is_empty() {
            hints.push("WARNING: Some previous tool calls returned empty results. DO NOT use the same tool again with similar parameters.".to_string());
            for tool in &ctx.empty_tools {
                let Some(fallback) = self.fallbacks.get(tool) else {
                    continue;
                };
                if available(fallback.as_str()) && !ctx.empty_tools.contains(fallback) {
                    hints.push(format!(
                        "Since {tool} returned empty results, try using {fallback} instead."
                    ));
                }
            }
        }
        if ctx.tools_used.len() >= 2 {
            hints.push("You've already used multiple tools. Consider synthesizing the information you have into a FINAL_ANSWER.".to_string());
        }
        if ctx.tools_used.is_empty() {
            let query = perception.user_input.to_lowercase();
            let hit = self.lexical_hints.iter().find_map(|hint| {
                if !available(hint.tool.as_str()) {
                    return None;
                }
                hint.keywords
                    .iter()
                    .find(|k| query.contains(&k.to_lowercase()))
                    .map(|k| (k, &hint.tool))
            });
            if let Some((keyword, tool)) = hit {
                hints.push(format!(
                    "This query mentions '{keyword}'. Start with {tool}."
                ));
            }
        }
        hints
    }

    pub fn build_prompt(
        &self,
        perception: &PerceptionResult,
        memories: &[MemoryItem],
        tools: &[ToolDescriptor],
    ) -> String {
        let ctx = summarize_memories(memories, &self.empty_fields);
        let hints = self.hints(&ctx, perception, tools);
        let tools_context = if tools.is_empty() {
            "Available tools: none".to_string()
        } else {
            format!("Available tools:\n{}", describe_catalog(tools))
        };
        let entities = if perception.entities.is_empty() {
            "None".to_string()
        } else {
            perception.entities.join(", ")
        };
        let extra = hints
            .iter()
            .map(|h| format!("\n{h}"))
            .collect::<String>();

        format!(
            r#"You are a research assistant agent that uses specialized tools to answer questions.
Your job is to determine which tool to use next or provide a final answer.

User query: "{query}"
Intent: {intent}
Entities detected: {entities}
Tool suggestion: {tool_hint}
Reasoning type required: {reasoning}

{tools_context}

Relevant context from memory:
{memory}
{extra}

Respond in ONE of these formats:
1. If you need to use a tool, reply with:
   TOOL_CALL: tool_name|param1=value1|param2=value2

2. If you have the final answer, reply with:
   FINAL_ANSWER: your detailed answer here

Your response should be exactly ONE of the above formats. No additional text or explanation.

Examples:
- TOOL_CALL: paper_retrieval_tool|keywords=["quantum computing"]|authors=["Feynman"]
- TOOL_CALL: concept_extractor|text="quantum superposition refers to..."
- FINAL_ANSWER: Based on the analysis, the relationship between domain X and domain Y is..."#,
            query = perception.user_input,
            intent = perception.intent.as_deref().unwrap_or("Unknown"),
            tool_hint = perception.tool_hint.as_deref().unwrap_or("None"),
            reasoning = perception.reasoning_type.as_deref().unwrap_or("Unknown"),
            memory = ctx.text,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{default_empty_collection_fields, DecisionSection};
    use crate::llm::{MockLlmClient, Scripted};
    use serde_json::json;
    use std::sync::Arc;

    fn catalog(names: &[&str]) -> Vec<ToolDescriptor> {
        names
            .iter()
            .map(|n| ToolDescriptor::new(*n, format!("{n} tool"), Value::Null))
            .collect()
    }

    fn engine(llm: Arc<MockLlmClient>) -> DecisionEngine {
        DecisionEngine::new(
            Reasoner::new(llm),
            &DecisionSection::default(),
            default_empty_collection_fields(),
        )
    }

    fn perception(input: &str) -> PerceptionResult {
        PerceptionResult::degraded(input)
    }

    #[test]
    fn test_parse_plan_picks_first_valid_line() {
        let plan = parse_plan("Thinking...\nTOOL_CALL: foo|x=1\nFINAL_ANSWER: no");
        assert_eq!(plan.line, "TOOL_CALL: foo|x=1");
        assert_eq!(
            plan.decision,
            PlanDecision::ToolCall {
                name: "foo".into(),
                arguments: json!({"x": 1}).as_object().cloned().unwrap(),
            }
        );
    }

    #[test]
    fn test_parse_plan_final_answer_keeps_continuation() {
        let plan = parse_plan("FINAL_ANSWER: Found two papers:\n1. A\n2. B");
        assert_eq!(
            plan.decision,
            PlanDecision::FinalAnswer {
                text: "Found two papers:\n1. A\n2. B".into()
            }
        );
    }

    #[test]
    fn test_parse_plan_fails_open_to_final_answer() {
        let plan = parse_plan("TOOL_CALL: foo|broken\nJust some prose.");
        assert!(plan.is_final());
        assert_eq!(
            plan.decision,
            PlanDecision::FinalAnswer {
                text: "TOOL_CALL: foo|broken\nJust some prose.".into()
            }
        );
    }

    #[test]
    fn test_first_turn_lexical_hint_requires_catalog_entry() {
        let e = engine(Arc::new(MockLlmClient::default()));
        let p = perception("find research papers about GNNs");
        let with = e.build_prompt(&p, &[], &catalog(&["paper_retrieval_tool"]));
        assert!(with.contains("Start with paper_retrieval_tool"));
        let without = e.build_prompt(&p, &[], &catalog(&["other_tool"]));
        assert!(!without.contains("Start with"));
        assert!(without.contains("None available"));
    }

    #[test]
    fn test_empty_result_flag_and_fallback_hint() {
        let e = engine(Arc::new(MockLlmClient::default()));
        let memories = vec![MemoryItem::tool_output(
            "{\"network\":{\"edges\":[],\"nodes\":[]}}",
            "citation_network_analyzer",
            "s",
            "q",
        )];
        let tools = catalog(&["citation_network_analyzer", "concept_extractor"]);
        let prompt = e.build_prompt(&perception("q"), &memories, &tools);
        assert!(prompt.contains("citation_network_analyzer returned EMPTY RESULTS"));
        assert!(prompt.contains("DO NOT use the same tool again"));
        assert!(prompt.contains("try using concept_extractor instead"));
        assert!(!prompt.contains("Start with"));
    }

    #[test]
    fn test_both_hints_surface_together() {
        let e = engine(Arc::new(MockLlmClient::default()));
        let memories = vec![
            MemoryItem::tool_output("{\"papers\":[]}", "paper_retrieval_tool", "s", "q"),
            MemoryItem::tool_output("{\"concepts\":[\"x\"]}", "concept_extractor", "s", "q"),
        ];
        let prompt = e.build_prompt(
            &perception("q"),
            &memories,
            &catalog(&["paper_retrieval_tool", "concept_extractor"]),
        );
        assert!(prompt.contains("WARNING"));
        assert!(prompt.contains("already used multiple tools"));
        assert!(prompt.contains("Previous concept_extractor result"));
    }

    #[tokio::test]
    async fn test_plan_degrades_on_reasoner_failure() {
        let llm = Arc::new(MockLlmClient::with_script([Scripted::Fail("down".into())]));
        let plan = engine(llm).plan(&perception("q"), &[], &[]).await;
        assert!(plan.is_final());
    }
}
