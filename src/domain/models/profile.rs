//! Agent profile model: the persona a delegation runs under.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a profile is backed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileKind {
    /// Direct LLM invocation.
    Llm,
    /// Local executable bridged through the sandbox.
    Binary,
    /// Tool server reached over an MCP bridge.
    McpBridge,
}

impl Default for ProfileKind {
    fn default() -> Self {
        Self::Llm
    }
}

impl ProfileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Llm => "llm",
            Self::Binary => "binary",
            Self::McpBridge => "mcp_bridge",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "llm" => Some(Self::Llm),
            "binary" => Some(Self::Binary),
            "mcp_bridge" | "mcp-bridge" => Some(Self::McpBridge),
            _ => None,
        }
    }
}

/// A named persona: system prompt, tool allow-list, model defaults, and a
/// hard token-budget ceiling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: Uuid,
    pub name: String,
    pub system_prompt: String,
    pub max_token_budget: u64,
    /// Tools the model may call. Calls outside this list are suppressed.
    pub allowed_tools: Vec<String>,
    pub default_model: String,
    pub kind: ProfileKind,
    pub created_at: DateTime<Utc>,
}

impl AgentProfile {
    pub fn new(
        name: impl Into<String>,
        system_prompt: impl Into<String>,
        default_model: impl Into<String>,
        max_token_budget: u64,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            system_prompt: system_prompt.into(),
            max_token_budget,
            allowed_tools: Vec::new(),
            default_model: default_model.into(),
            kind: ProfileKind::Llm,
            created_at: Utc::now(),
        }
    }

    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.allowed_tools = tools;
        self
    }

    pub fn allows_tool(&self, tool: &str) -> bool {
        self.allowed_tools.iter().any(|t| t == tool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_allow_list() {
        let profile = AgentProfile::new("coder", "You write code.", "small-model", 100_000)
            .with_tools(vec!["read_file".into(), "write_file".into()]);
        assert!(profile.allows_tool("read_file"));
        assert!(!profile.allows_tool("shell"));
    }

    #[test]
    fn test_kind_round_trip() {
        for kind in [ProfileKind::Llm, ProfileKind::Binary, ProfileKind::McpBridge] {
            assert_eq!(ProfileKind::parse_str(kind.as_str()), Some(kind));
        }
        assert_eq!(ProfileKind::parse_str("mcp-bridge"), Some(ProfileKind::McpBridge));
    }
}
