//! 主循环端到端测试：脚本化推理服务 + 进程外风格的假工具会话

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use owl::agent::{create_agent_components_with, AgentComponents};
use owl::config::AppConfig;
use owl::llm::{HashingEmbedder, LlmClient, Message};
use owl::memory::MemoryKind;
use owl::react::ReactEvent;
use owl::tools::{ToolDescriptor, ToolResponse, ToolSession};

/// 按 prompt 类型路由的推理服务：感知返回固定 JSON，决策依次弹出脚本，综合返回固定文本
struct ScriptedResearcher {
    decisions: Mutex<VecDeque<String>>,
    default_decision: String,
    decision_prompts: Mutex<Vec<String>>,
    fail_synthesis: bool,
}

impl ScriptedResearcher {
    fn new(decisions: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            decisions: Mutex::new(decisions.iter().map(|d| d.to_string()).collect()),
            default_decision: "FINAL_ANSWER: done".into(),
            decision_prompts: Mutex::new(Vec::new()),
            fail_synthesis: false,
        })
    }

    fn repeating(decision: &str) -> Arc<Self> {
        Arc::new(Self {
            decisions: Mutex::new(VecDeque::new()),
            default_decision: decision.into(),
            decision_prompts: Mutex::new(Vec::new()),
            fail_synthesis: false,
        })
    }

    fn decision_prompts(&self) -> Vec<String> {
        self.decision_prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedResearcher {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let prompt = messages.last().map(|m| m.content.clone()).unwrap_or_default();
        if prompt.contains("extracts structured information") {
            return Ok(r#"```json
{"intent": "find papers", "entities": ["graph neural networks"], "tool_hint": "paper_retrieval_tool", "reasoning_type": "retrieval"}
```"#
                .into());
        }
        if prompt.contains("Respond in ONE of these formats") {
            self.decision_prompts.lock().unwrap().push(prompt);
            let next = self.decisions.lock().unwrap().pop_front();
            return Ok(next.unwrap_or_else(|| self.default_decision.clone()));
        }
        if self.fail_synthesis {
            return Err("synthesis unavailable".into());
        }
        if prompt.contains("I need to provide information about") {
            return Ok("Background knowledge about the topic.".into());
        }
        Ok("Synthesized answer.".into())
    }
}

/// 假的研究工具会话
struct ResearchTools {
    calls: Mutex<Vec<(String, Map<String, Value>)>>,
    fail_listing: bool,
}

impl ResearchTools {
    fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_listing: false,
        }
    }

    fn calls(&self) -> Vec<(String, Map<String, Value>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolSession for ResearchTools {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, String> {
        if self.fail_listing {
            return Err("connection refused".into());
        }
        Ok(vec![
            ToolDescriptor::new(
                "paper_retrieval_tool",
                "Search research papers by keywords",
                json!({"type": "object", "properties": {
                    "keywords": {"type": "array", "items": {"type": "string"}}
                }}),
            ),
            ToolDescriptor::new(
                "citation_network_analyzer",
                "Build a citation network for papers",
                json!({"type": "object", "properties": {
                    "paper_ids": {"type": "array", "items": {"type": "string"}}
                }}),
            ),
            ToolDescriptor::new(
                "concept_extractor",
                "Extract key concepts from text",
                json!({"type": "object", "properties": {"text": {"type": "string"}}}),
            ),
        ])
    }

    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> Result<ToolResponse, String> {
        self.calls.lock().unwrap().push((name.to_string(), arguments));
        let body = match name {
            "paper_retrieval_tool" => json!({"papers": [
                {"id": "2101.00001", "title": "Graph Networks for Molecules", "keywords": ["gnn", "chemistry"]},
                {"id": "2101.00002", "title": "Message Passing Revisited"}
            ]}),
            "citation_network_analyzer" => json!({"network": {"nodes": [], "edges": []}}),
            _ => json!({"concepts": ["message passing"]}),
        };
        Ok(ToolResponse::text(body.to_string()))
    }
}

async fn components(dir: &std::path::Path, llm: Arc<ScriptedResearcher>) -> AgentComponents {
    let mut cfg = AppConfig::default();
    cfg.embedding.dimension = 64;
    cfg.memory.episodic_dir = dir.join("episodic");
    cfg.memory.document_dir = dir.join("documents");
    create_agent_components_with(cfg, llm, Arc::new(HashingEmbedder::new(64))).await
}

#[tokio::test]
async fn test_paper_search_terminates_at_second_iteration() {
    let dir = tempfile::tempdir().unwrap();
    let llm = ScriptedResearcher::new(&[
        r#"TOOL_CALL: paper_retrieval_tool|keywords=["graph neural networks"]"#,
        "FINAL_ANSWER: I found Graph Networks for Molecules and Message Passing Revisited.",
    ]);
    let c = components(dir.path(), llm.clone()).await;
    let tools = ResearchTools::new();
    let mut agent = c.agent();

    let response = agent
        .process_query(&tools, "find papers about graph neural networks", Some("s1"))
        .await;

    assert_eq!(response.steps, 2);
    assert!(response.response_text.contains("Graph Networks for Molecules"));
    assert!(response.response_text.contains("Message Passing Revisited"));
    assert_eq!(response.tool_used.as_deref(), Some("paper_retrieval_tool"));
    assert!(response.data.is_none());
    assert_eq!(response.session_id, "s1");

    let calls = tools.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1["keywords"], json!(["graph neural networks"]));

    let prompts = llm.decision_prompts();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[0].contains("Start with paper_retrieval_tool"));
    assert!(prompts[1].contains("Previous paper_retrieval_tool result"));
    assert!(prompts[1].contains("IMPORTANT"));

    let kinds: Vec<MemoryKind> = c
        .episodic
        .session_items("s1")
        .into_iter()
        .map(|i| i.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            MemoryKind::UserQuery,
            MemoryKind::ToolOutput,
            MemoryKind::AgentResponse
        ]
    );
    assert_eq!(c.episodic.conversation_history("s1").len(), 2);
}

#[tokio::test]
async fn test_empty_result_steers_away_from_same_call() {
    let dir = tempfile::tempdir().unwrap();
    let llm = ScriptedResearcher::new(&[
        "TOOL_CALL: citation_network_analyzer|paper_ids=2101.00010",
        "TOOL_CALL: concept_extractor|text=graph networks",
        "FINAL_ANSWER: Concepts: message passing.",
    ]);
    let c = components(dir.path(), llm.clone()).await;
    let tools = ResearchTools::new();
    let mut agent = c.agent();

    let response = agent
        .process_query(&tools, "analyze citations of 2101.00010", Some("s2"))
        .await;
    assert_eq!(response.response_text, "Concepts: message passing.");

    let prompts = llm.decision_prompts();
    assert!(prompts[1].contains("citation_network_analyzer returned EMPTY RESULTS"));
    assert!(prompts[1].contains("try using concept_extractor instead"));

    let calls = tools.calls();
    let names: Vec<&str> = calls.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["citation_network_analyzer", "concept_extractor"]);
    assert_eq!(calls[0].1["paper_ids"], json!(["2101.00010"]));
}

#[tokio::test]
async fn test_second_repetition_forces_synthesis() {
    let dir = tempfile::tempdir().unwrap();
    let llm = ScriptedResearcher::repeating("TOOL_CALL: concept_extractor|text=graphs");
    let c = components(dir.path(), llm.clone()).await;
    let tools = ResearchTools::new();
    let mut agent = c.agent();

    let response = agent.process_query(&tools, "explain graphs", None).await;

    // 第一次重复仍执行，第二次重复才强制终止
    assert_eq!(tools.calls().len(), 2);
    assert_eq!(llm.decision_prompts().len(), 3);
    assert_eq!(response.data, Some(json!({"forced_by_repetition": true})));
    assert_eq!(response.response_text, "Synthesized answer.");
    assert!(response.session_id.starts_with("session-"));
}

#[tokio::test]
async fn test_step_budget_is_never_exceeded() {
    let dir = tempfile::tempdir().unwrap();
    let llm = ScriptedResearcher::new(&[
        "TOOL_CALL: concept_extractor|text=a0",
        "TOOL_CALL: concept_extractor|text=a1",
        "TOOL_CALL: concept_extractor|text=a2",
        "TOOL_CALL: concept_extractor|text=a3",
        "TOOL_CALL: concept_extractor|text=a4",
        "TOOL_CALL: concept_extractor|text=a5",
    ]);
    let c = components(dir.path(), llm.clone()).await;
    let tools = ResearchTools::new();
    let mut agent = c.agent();

    let response = agent.process_query(&tools, "tell me about graphs", None).await;

    assert_eq!(response.steps, 5);
    assert_eq!(tools.calls().len(), 5);
    assert_eq!(llm.decision_prompts().len(), 5);
    assert_eq!(response.data, Some(json!({"reached_max_steps": true})));
    // 第二步起检索到 ≥2 条工具输出时，查询被改写为综合请求
    assert!(llm.decision_prompts()[2].contains("Please provide a FINAL_ANSWER that synthesizes"));
}

#[tokio::test]
async fn test_failed_synthesis_falls_back_to_apology() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(ScriptedResearcher {
        decisions: Mutex::new(VecDeque::new()),
        default_decision: r#"TOOL_CALL: paper_retrieval_tool|keywords=["gnn"]"#.into(),
        decision_prompts: Mutex::new(Vec::new()),
        fail_synthesis: true,
    });
    let c = components(dir.path(), llm).await;
    let tools = ResearchTools::new();
    let mut agent = c.agent();

    let response = agent.process_query(&tools, "what is a gnn", None).await;
    assert!(response
        .response_text
        .contains("Graph Networks for Molecules, Message Passing Revisited"));
    assert_eq!(response.data, Some(json!({"forced_by_repetition": true})));
}

#[tokio::test]
async fn test_unknown_tool_and_missing_catalog_do_not_abort() {
    let dir = tempfile::tempdir().unwrap();
    let llm = ScriptedResearcher::new(&[
        "TOOL_CALL: paper_retrieval_tool|keywords=gnn",
        "FINAL_ANSWER: Nothing could be retrieved.",
    ]);
    let c = components(dir.path(), llm.clone()).await;
    let mut tools = ResearchTools::new();
    tools.fail_listing = true;
    let mut agent = c.agent();

    let response = agent.process_query(&tools, "find papers", Some("s3")).await;
    assert_eq!(response.response_text, "Nothing could be retrieved.");
    assert!(tools.calls().is_empty());

    let prompts = llm.decision_prompts();
    assert!(prompts[0].contains("Available tools: none"));
    assert!(prompts[1].contains("paper_retrieval_tool returned EMPTY RESULTS"));
}

#[tokio::test]
async fn test_events_are_streamed() {
    let dir = tempfile::tempdir().unwrap();
    let llm = ScriptedResearcher::new(&[
        r#"TOOL_CALL: paper_retrieval_tool|keywords=["gnn"]"#,
        "FINAL_ANSWER: done",
    ]);
    let c = components(dir.path(), llm).await;
    let tools = ResearchTools::new();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let mut agent = c.agent().with_event_tx(tx);

    agent.process_query(&tools, "find papers", None).await;
    drop(agent);

    let mut events = Vec::new();
    while let Some(ev) = rx.recv().await {
        events.push(ev);
    }
    assert!(matches!(events.first(), Some(ReactEvent::StepUpdate { step: 1, max_steps: 5 })));
    assert!(events
        .iter()
        .any(|e| matches!(e, ReactEvent::Observation { useful: true, .. })));
    assert!(matches!(events.last(), Some(ReactEvent::FinalAnswer { text }) if text == "done"));
}
