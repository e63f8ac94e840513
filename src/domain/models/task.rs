//! Task domain model.
//!
//! A task is one unit of work admitted through the executor. Only the
//! SHA-256 of the canonicalised input is persisted, never the input itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Admitted and queued, not yet picked up.
    Pending,
    /// Currently executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Handler raised an error.
    Failed,
    /// Ran past its deadline.
    Timeout,
    /// Aborted by an external cancel.
    Cancelled,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
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
            "completed" | "complete" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "timeout" => Some(Self::Timeout),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Timeout | Self::Cancelled
        )
    }

    /// Valid transitions from this status. All transitions out of
    /// `Running` are terminal; there is no re-entry.
    pub fn valid_transitions(&self) -> &'static [TaskStatus] {
        match self {
            Self::Pending => &[Self::Running, Self::Cancelled],
            Self::Running => &[Self::Completed, Self::Failed, Self::Timeout, Self::Cancelled],
            Self::Completed | Self::Failed | Self::Timeout | Self::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

/// What kind of work this task represents. The handler registry is keyed
/// by this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// General-purpose work (default).
    Standard,
    /// Code review request.
    CodeReview,
    /// Research or analysis task (read-only, produces findings).
    Research,
    /// Delegated sub-agent invocation surfaced as a task.
    Delegation,
    /// Swarm run surfaced as a task.
    Swarm,
    /// Maintenance work (retention, pruning, re-indexing).
    Maintenance,
}

impl Default for TaskType {
    fn default() -> Self {
        Self::Standard
    }
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::CodeReview => "code_review",
            Self::Research => "research",
            Self::Delegation => "delegation",
            Self::Swarm => "swarm",
            Self::Maintenance => "maintenance",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "standard" => Some(Self::Standard),
            "code_review" => Some(Self::CodeReview),
            "research" => Some(Self::Research),
            "delegation" => Some(Self::Delegation),
            "swarm" => Some(Self::Swarm),
            "maintenance" => Some(Self::Maintenance),
            _ => None,
        }
    }
}

/// Security context snapshotted at admission time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityContext {
    /// Acting user id.
    pub user_id: String,
    /// Role the user acted under.
    pub role: String,
    /// Permissions asserted at submission.
    pub permissions: Vec<String>,
    /// Client IP, when the request came through the gateway.
    pub ip_address: Option<String>,
    /// Client user agent, when available.
    pub user_agent: Option<String>,
}

impl SecurityContext {
    pub fn new(user_id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role: role.into(),
            permissions: Vec::new(),
            ip_address: None,
            user_agent: None,
        }
    }

    pub fn with_permissions(mut self, permissions: Vec<String>) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn with_client(mut self, ip: impl Into<String>, user_agent: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self.user_agent = Some(user_agent.into());
        self
    }
}

/// Structured error carried by a failed outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Semantic code (`TIMEOUT`, `EXECUTION_ERROR`, ...).
    pub code: String,
    /// Sanitised message; no stack traces, no secrets.
    pub message: String,
    /// Whether retrying the same request could succeed.
    pub recoverable: bool,
}

/// Terminal outcome of a task. Success carries only the hash of the
/// canonicalised output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl TaskOutcome {
    pub fn success(output_hash: impl Into<String>) -> Self {
        Self {
            success: true,
            output_hash: Some(output_hash.into()),
            error: None,
        }
    }

    pub fn failure(code: impl Into<String>, message: impl Into<String>, recoverable: bool) -> Self {
        Self {
            success: false,
            output_hash: None,
            error: Some(ErrorInfo {
                code: code.into(),
                message: message.into(),
                recoverable,
            }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }
}

/// Resource accounting recorded when a task finishes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub tokens_total: u64,
    pub tokens_cached: u64,
    /// Peak resident set observed, in megabytes.
    pub peak_memory_mb: f64,
    pub cpu_time_ms: u64,
    pub network_bytes: u64,
    /// Per-provider call counts.
    pub provider_calls: HashMap<String, u64>,
}

/// One unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Time-ordered id (UUIDv7), monotonic across a single process.
    pub id: Uuid,
    /// Correlates related tasks across subsystems.
    pub correlation_id: Option<Uuid>,
    /// Parent task when part of a tree.
    pub parent_id: Option<Uuid>,
    pub task_type: TaskType,
    pub name: String,
    pub description: Option<String>,
    /// SHA-256 of the canonicalised input. The input itself is never stored.
    pub input_hash: String,
    pub status: TaskStatus,
    pub timeout_ms: u64,
    pub security: SecurityContext,
    pub outcome: Option<TaskOutcome>,
    pub resources: Option<ResourceUsage>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
}

impl Task {
    pub fn new(
        task_type: TaskType,
        name: impl Into<String>,
        input_hash: impl Into<String>,
        timeout_ms: u64,
        security: SecurityContext,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            correlation_id: None,
            parent_id: None,
            task_type,
            name: name.into(),
            description: None,
            input_hash: input_hash.into(),
            status: TaskStatus::Pending,
            timeout_ms,
            security,
            outcome: None,
            resources: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            duration_ms: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_parent(mut self, parent_id: Uuid) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    /// Mark the task running.
    pub fn start(&mut self) {
        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Apply a terminal transition. Sets `completed_at` and derives
    /// `duration_ms` from `started_at` per the lifecycle invariant.
    pub fn finish(&mut self, status: TaskStatus, outcome: TaskOutcome) {
        debug_assert!(status.is_terminal());
        let now = Utc::now();
        self.status = status;
        self.outcome = Some(outcome);
        self.completed_at = Some(now);
        if let Some(started) = self.started_at {
            self.duration_ms = Some(
                u64::try_from((now - started).num_milliseconds().max(0)).unwrap_or(0),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_terminal_classification() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Timeout.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_status_transitions() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Timeout));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Running));
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Completed));
    }

    #[test]
    fn test_task_ids_are_time_ordered() {
        let a = Task::new(
            TaskType::Standard,
            "a",
            "hash",
            1000,
            SecurityContext::new("u1", "admin"),
        );
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = Task::new(
            TaskType::Standard,
            "b",
            "hash",
            1000,
            SecurityContext::new("u1", "admin"),
        );
        assert!(a.id < b.id, "UUIDv7 ids sort by creation time");
    }

    #[test]
    fn test_finish_sets_duration() {
        let mut task = Task::new(
            TaskType::Standard,
            "t",
            "hash",
            1000,
            SecurityContext::new("u1", "admin"),
        );
        task.start();
        task.finish(TaskStatus::Completed, TaskOutcome::success("out"));
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.completed_at.is_some());
        assert!(task.duration_ms.is_some());
        let completed = task.completed_at.unwrap();
        let started = task.started_at.unwrap();
        assert!(completed >= started && started >= task.created_at);
    }

    #[test]
    fn test_outcome_serialization_shape() {
        let ok = TaskOutcome::success("abc");
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["output_hash"], "abc");
        assert!(json.get("error").is_none());

        let err = TaskOutcome::failure("TIMEOUT", "timed out", true);
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "TIMEOUT");
    }
}
