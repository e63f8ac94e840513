//! Delegation domain model.
//!
//! A delegation is one invocation of an agent profile. Delegations form a
//! tree: `depth` strictly increases from parent to child and `max_depth`
//! bounds it, so there are no cycles by construction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a delegation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegationStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Timeout,
    Cancelled,
}

impl DelegationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "timeout" => Some(Self::Timeout),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Timeout | Self::Cancelled
        )
    }
}

/// Token accounting for one delegation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt: u64,
    pub completion: u64,
    pub cached: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt.saturating_add(self.completion)
    }

    pub fn add(&mut self, other: TokenUsage) {
        self.prompt = self.prompt.saturating_add(other.prompt);
        self.completion = self.completion.saturating_add(other.completion);
        self.cached = self.cached.saturating_add(other.cached);
    }
}

/// Role tag on a traced message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "system" => Some(Self::System),
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "tool" => Some(Self::Tool),
            _ => None,
        }
    }
}

/// One entry of the ordered per-delegation message trace, kept for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegationMessage {
    pub id: Uuid,
    pub delegation_id: Uuid,
    pub seq: u32,
    pub role: MessageRole,
    pub content: String,
    /// Tool calls the model produced, after allow-list filtering.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<serde_json::Value>,
    pub token_count: u64,
}

impl DelegationMessage {
    pub fn new(
        delegation_id: Uuid,
        seq: u32,
        role: MessageRole,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            delegation_id,
            seq,
            role,
            content: content.into(),
            tool_calls: None,
            tool_result: None,
            token_count: 0,
        }
    }

    pub fn with_tool_calls(mut self, calls: serde_json::Value) -> Self {
        self.tool_calls = Some(calls);
        self
    }

    pub fn with_token_count(mut self, count: u64) -> Self {
        self.token_count = count;
        self
    }
}

/// One invocation of an agent profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delegation {
    pub id: Uuid,
    pub profile_id: Uuid,
    pub profile_name: String,
    /// Parent delegation for recursive spawns.
    pub parent_id: Option<Uuid>,
    pub task: String,
    pub context: Option<String>,
    pub depth: u32,
    pub max_depth: u32,
    pub token_budget: u64,
    pub timeout_ms: u64,
    pub model: String,
    pub status: DelegationStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    pub tokens: TokenUsage,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Delegation {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        profile_id: Uuid,
        profile_name: impl Into<String>,
        task: impl Into<String>,
        depth: u32,
        max_depth: u32,
        token_budget: u64,
        timeout_ms: u64,
        model: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            profile_id,
            profile_name: profile_name.into(),
            parent_id: None,
            task: task.into(),
            context: None,
            depth,
            max_depth,
            token_budget,
            timeout_ms,
            model: model.into(),
            status: DelegationStatus::Pending,
            result: None,
            error: None,
            tokens: TokenUsage::default(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_parent(mut self, parent_id: Uuid) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn start(&mut self) {
        self.status = DelegationStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn finish(&mut self, status: DelegationStatus) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.completed_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_usage_totals() {
        let mut usage = TokenUsage {
            prompt: 100,
            completion: 40,
            cached: 10,
        };
        assert_eq!(usage.total(), 140);
        usage.add(TokenUsage {
            prompt: 1,
            completion: 2,
            cached: 3,
        });
        assert_eq!(usage.prompt, 101);
        assert_eq!(usage.completion, 42);
        assert_eq!(usage.cached, 13);
    }

    #[test]
    fn test_delegation_lifecycle() {
        let mut d = Delegation::new(
            Uuid::now_v7(),
            "researcher",
            "find prior art",
            0,
            3,
            50_000,
            30_000,
            "small-model",
        );
        assert_eq!(d.status, DelegationStatus::Pending);
        d.start();
        assert!(d.started_at.is_some());
        d.finish(DelegationStatus::Completed);
        assert!(d.status.is_terminal());
        assert!(d.completed_at.is_some());
    }

    #[test]
    fn test_message_trace_ordering_fields() {
        let did = Uuid::now_v7();
        let m = DelegationMessage::new(did, 2, MessageRole::Assistant, "answer")
            .with_token_count(17);
        assert_eq!(m.delegation_id, did);
        assert_eq!(m.seq, 2);
        assert_eq!(m.token_count, 17);
        assert!(m.tool_calls.is_none());
    }
}
