//! 记忆条目与过滤条件
//!
//! 两种记忆共用 MemoryItem：情景记忆（user_query / tool_output / system_message / agent_response）
//! 与文档记忆（fact / preference / query / system）。条目创建后不可变，更新以新条目表示。

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 记忆类型；每个存储只接受自己那一半
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    UserQuery,
    ToolOutput,
    SystemMessage,
    AgentResponse,
    #[default]
    Fact,
    Preference,
    Query,
    System,
}

impl MemoryKind {
    pub fn is_episodic(self) -> bool {
        matches!(
            self,
            MemoryKind::UserQuery
                | MemoryKind::ToolOutput
                | MemoryKind::SystemMessage
                | MemoryKind::AgentResponse
        )
    }

    pub fn is_document(self) -> bool {
        !self.is_episodic()
    }

    pub fn is_fact(&self) -> bool {
        *self == MemoryKind::Fact
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MemoryKind::UserQuery => "user_query",
            MemoryKind::ToolOutput => "tool_output",
            MemoryKind::SystemMessage => "system_message",
            MemoryKind::AgentResponse => "agent_response",
            MemoryKind::Fact => "fact",
            MemoryKind::Preference => "preference",
            MemoryKind::Query => "query",
            MemoryKind::System => "system",
        }
    }
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一条观察到或生成的事实
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    pub text: String,
    pub kind: MemoryKind,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub tool_name: Option<String>,
    /// 产生该条目时用户的原始问题
    #[serde(default)]
    pub user_query: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl MemoryItem {
    pub fn new(text: impl Into<String>, kind: MemoryKind) -> Self {
        Self {
            text: text.into(),
            kind,
            timestamp: Utc::now(),
            tool_name: None,
            user_query: None,
            tags: Vec::new(),
            session_id: None,
        }
    }

    pub fn user_query(text: impl Into<String>, session_id: &str) -> Self {
        Self::new(text, MemoryKind::UserQuery).in_session(session_id)
    }

    pub fn agent_response(text: impl Into<String>, session_id: &str, query: &str) -> Self {
        Self::new(text, MemoryKind::AgentResponse)
            .in_session(session_id)
            .for_query(query)
    }

    /// 工具输出：tool_name 同时作为标签
    pub fn tool_output(text: impl Into<String>, tool: &str, session_id: &str, query: &str) -> Self {
        let mut item = Self::new(text, MemoryKind::ToolOutput)
            .in_session(session_id)
            .for_query(query);
        item.tool_name = Some(tool.to_string());
        item.tags.push(tool.to_string());
        item
    }

    pub fn in_session(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }

    pub fn for_query(mut self, query: &str) -> Self {
        self.user_query = Some(query.to_string());
        self
    }

    pub fn with_tags<S: Into<String>>(mut self, tags: impl IntoIterator<Item = S>) -> Self {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// retrieve 的过滤条件：依次按 kind、tags（任一命中）、session 过滤
#[derive(Clone, Debug, Default)]
pub struct MemoryFilter {
    pub kind: Option<MemoryKind>,
    pub tags: Vec<String>,
    pub session_id: Option<String>,
}

impl MemoryFilter {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Default::default()
        }
    }

    pub fn with_kind(mut self, kind: MemoryKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_tags<S: Into<String>>(mut self, tags: impl IntoIterator<Item = S>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn matches(&self, item: &MemoryItem) -> bool {
        if let Some(kind) = self.kind {
            if item.kind != kind {
                return false;
            }
        }
        if !self.tags.is_empty() && !self.tags.iter().any(|t| item.tags.contains(t)) {
            return false;
        }
        if let Some(ref sid) = self.session_id {
            if item.session_id.as_deref() != Some(sid.as_str()) {
                return false;
            }
        }
        true
    }
}
