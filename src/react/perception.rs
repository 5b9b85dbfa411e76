//! 感知层：把原始输入整理为结构化记录
//!
//! - Perception：调用推理服务抽取 intent / entities / tool_hint / reasoning_type；回复视为不可信文本，
//!   去掉代码围栏后先按 JSON 解析，失败再按 Python 字面量解析；任何失败都退化为空结果，从不向上抛错
//! - PagePerception：网页索引前的域名拒绝列表与正文清洗

use std::sync::OnceLock;

use html2text::from_read;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::llm::Reasoner;
use crate::react::protocol::parse_literal;

/// 感知结果
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PerceptionResult {
    pub user_input: String,
    pub intent: Option<String>,
    pub entities: Vec<String>,
    pub tool_hint: Option<String>,
    pub reasoning_type: Option<String>,
}

impl PerceptionResult {
    /// 最大程度退化但仍合法的结果
    pub fn degraded(user_input: impl Into<String>) -> Self {
        Self {
            user_input: user_input.into(),
            ..Default::default()
        }
    }
}

pub struct Perception {
    reasoner: Reasoner,
}

impl Perception {
    pub fn new(reasoner: Reasoner) -> Self {
        Self { reasoner }
    }

    pub async fn extract(&self, input: &str) -> PerceptionResult {
        self.extract_with_tools(input, &[]).await
    }

    /// 抽取结构化信息；tools 为可用工具名，供 tool_hint 选择
    pub async fn extract_with_tools(&self, input: &str, tools: &[String]) -> PerceptionResult {
        let prompt = build_prompt(input, tools);
        match self.reasoner.generate(&prompt).await {
            Ok(reply) => {
                tracing::debug!(reply = %preview(&reply, 300), "perception reply");
                parse_reply(input, &reply)
            }
            Err(e) => {
                tracing::warn!(error = %e, "perception failed, degrading");
                PerceptionResult::degraded(input)
            }
        }
    }
}

fn build_prompt(input: &str, tools: &[String]) -> String {
    let tool_list = if tools.is_empty() {
        "None".to_string()
    } else {
        format!("{}, or None", tools.join(", "))
    };
    format!(
        r#"You are an AI that extracts structured information from user input to help a research assistant agent.

Input: "{input}"

Return the response as a JSON object with these keys:
- intent: (brief phrase describing what the user wants to do)
- entities: (list of strings representing keywords, topics, or named entities from the query)
- tool_hint: (suggest one of these tools: {tool_list})
- reasoning_type: (one of: retrieval, analysis, comparison, synthesis)

Only output valid JSON without any additional text or explanation."#
    )
}

/// 去掉 ``` / ```json 围栏
pub fn strip_code_fence(reply: &str) -> &str {
    let mut text = reply.trim();
    if let Some(rest) = text.strip_prefix("```") {
        text = match rest.find('\n') {
            Some(nl) => &rest[nl + 1..],
            None => rest.trim_start_matches("json"),
        };
    }
    if let Some(rest) = text.trim_end().strip_suffix("```") {
        text = rest;
    }
    text.trim()
}

pub fn parse_reply(input: &str, reply: &str) -> PerceptionResult {
    let body = strip_code_fence(reply);
    let parsed = serde_json::from_str::<Value>(body)
        .ok()
        .or_else(|| parse_literal(body));
    let Some(Value::Object(map)) = parsed else {
        tracing::warn!("perception reply is not an object, degrading");
        return PerceptionResult::degraded(input);
    };

    PerceptionResult {
        user_input: input.to_string(),
        intent: opt_text(map.get("intent")),
        entities: entity_list(map.get("entities")),
        tool_hint: opt_text(map.get("tool_hint")),
        reasoning_type: opt_text(map.get("reasoning_type")),
    }
}

fn opt_text(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    };
    if text.is_empty() || text == "None" || text == "null" {
        None
    } else {
        Some(text)
    }
}

/// entities 统一为字符串列表；映射取其值
fn entity_list(value: Option<&Value>) -> Vec<String> {
    let items: Vec<&Value> = match value {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(Value::Object(map)) => map.values().collect(),
        Some(v @ Value::String(_)) => vec![v],
        _ => Vec::new(),
    };
    items
        .into_iter()
        .filter_map(|v| opt_text(Some(v)))
        .collect()
}

fn preview(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        format!("{}...", s.chars().take(max).collect::<String>())
    } else {
        s.to_string()
    }
}

/// 页面被拒绝索引的原因
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PageRejection {
    #[error("Domain excluded from indexing")]
    ExcludedDomain,
    #[error("No valid content found")]
    NoContent,
}

/// 网页感知：拒绝列表 + 正文清洗
pub struct PagePerception {
    excluded_domains: Vec<String>,
}

impl Default for PagePerception {
    fn default() -> Self {
        Self::new(crate::config::default_excluded_domains())
    }
}

impl PagePerception {
    pub fn new(excluded_domains: Vec<String>) -> Self {
        Self {
            excluded_domains: excluded_domains
                .into_iter()
                .map(|d| d.trim().to_lowercase())
                .filter(|d| !d.is_empty())
                .collect(),
        }
    }

    pub fn excluded_domains(&self) -> &[String] {
        &self.excluded_domains
    }

    /// url 的 host 等于或属于拒绝列表中的域名
    pub fn is_excluded(&self, url: &str) -> bool {
        let host = extract_host(url);
        self.excluded_domains
            .iter()
            .any(|d| host == *d || host.ends_with(&format!(".{d}")))
    }

    /// 校验并清洗页面；返回可索引的正文
    pub fn inspect(&self, url: &str, html: &str) -> Result<String, PageRejection> {
        if self.is_excluded(url) {
            tracing::info!(url = %url, "domain excluded from indexing");
            return Err(PageRejection::ExcludedDomain);
        }
        let text = self.clean(html);
        if text.is_empty() {
            return Err(PageRejection::NoContent);
        }
        Ok(text)
    }

    /// 去除 script/style/nav/footer/header，转为纯文本并压缩空白
    pub fn clean(&self, html: &str) -> String {
        let stripped = match boilerplate_re() {
            Some(re) => re.replace_all(html, " ").into_owned(),
            None => html.to_string(),
        };
        let text = from_read(stripped.as_bytes(), 120).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "html2text failed, keeping raw content");
            stripped.clone()
        });
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

fn boilerplate_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?is)<script\b[^>]*>.*?</script\s*>|<style\b[^>]*>.*?</style\s*>|<nav\b[^>]*>.*?</nav\s*>|<footer\b[^>]*>.*?</footer\s*>|<header\b[^>]*>.*?</header\s*>",
        )
        .ok()
    })
    .as_ref()
}

/// 从 URL 中提取小写 host（去掉协议、端口、路径）
fn extract_host(url: &str) -> String {
    let url = url.trim();
    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
    let host = rest
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let host = host.rsplit('@').next().unwrap_or(host);
    host.split(':').next().unwrap_or(host).to_lowercase()
}
