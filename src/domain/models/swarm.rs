//! Swarm domain model.
//!
//! A swarm template is a reusable multi-role plan; a swarm run is one
//! execution of it, with ordered member rows per role.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How the roles of a template cooperate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwarmStrategy {
    /// Roles run one after another, each seeing prior results in context.
    Sequential,
    /// Roles run concurrently; an optional coordinator synthesises.
    Parallel,
    /// A single coordinator drives the run and spawns delegations itself.
    Dynamic,
}

impl SwarmStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
            Self::Dynamic => "dynamic",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "sequential" => Some(Self::Sequential),
            "parallel" => Some(Self::Parallel),
            "dynamic" => Some(Self::Dynamic),
            _ => None,
        }
    }
}

/// One role slot in a template, bound to a named agent profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwarmRole {
    pub role: String,
    pub profile_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl SwarmRole {
    pub fn new(role: impl Into<String>, profile_name: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            profile_name: profile_name.into(),
            description: None,
        }
    }
}

/// A reusable multi-role plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwarmTemplate {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub strategy: SwarmStrategy,
    /// Ordered role list. Non-empty for sequential/parallel strategies.
    pub roles: Vec<SwarmRole>,
    /// Coordinator profile. Required for dynamic (a configured default
    /// applies when absent); optional synthesiser for parallel.
    pub coordinator_profile: Option<String>,
    pub is_builtin: bool,
    pub created_at: DateTime<Utc>,
}

impl SwarmTemplate {
    pub fn new(name: impl Into<String>, strategy: SwarmStrategy, roles: Vec<SwarmRole>) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            description: None,
            strategy,
            roles,
            coordinator_profile: None,
            is_builtin: false,
            created_at: Utc::now(),
        }
    }

    pub fn with_coordinator(mut self, profile: impl Into<String>) -> Self {
        self.coordinator_profile = Some(profile.into());
        self
    }

    pub fn builtin(mut self) -> Self {
        self.is_builtin = true;
        self
    }

    /// Structural validity: sequential/parallel need roles.
    pub fn validate(&self) -> Result<(), String> {
        match self.strategy {
            SwarmStrategy::Sequential | SwarmStrategy::Parallel if self.roles.is_empty() => {
                Err(format!(
                    "template '{}': {} strategy requires a non-empty role list",
                    self.name,
                    self.strategy.as_str()
                ))
            }
            _ => Ok(()),
        }
    }
}

/// Lifecycle state of a swarm run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwarmRunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SwarmRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Cancellation is only legal from pending or running.
    pub fn cancellable(&self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }
}

/// Per-member state within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwarmMemberStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SwarmMemberStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// One role execution within a run. `seq_order` is unique within the run;
/// a synthesised coordinator member sits at `seq_order = |roles|`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwarmMember {
    pub id: Uuid,
    pub run_id: Uuid,
    pub seq_order: u32,
    pub role: String,
    pub profile_name: String,
    pub status: SwarmMemberStatus,
    pub result: Option<String>,
    pub delegation_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SwarmMember {
    pub fn new(
        run_id: Uuid,
        seq_order: u32,
        role: impl Into<String>,
        profile_name: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            run_id,
            seq_order,
            role: role.into(),
            profile_name: profile_name.into(),
            status: SwarmMemberStatus::Pending,
            result: None,
            delegation_id: None,
            started_at: None,
            completed_at: None,
        }
    }
}

/// One execution of a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwarmRun {
    pub id: Uuid,
    pub template_id: Uuid,
    pub task: String,
    pub context: Option<String>,
    /// Strategy snapshot taken at launch; later template edits do not
    /// affect a run in flight.
    pub strategy: SwarmStrategy,
    pub status: SwarmRunStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    pub token_budget: u64,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub initiator: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SwarmRun {
    pub fn new(
        template: &SwarmTemplate,
        task: impl Into<String>,
        token_budget: u64,
        initiator: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            template_id: template.id,
            task: task.into(),
            context: None,
            strategy: template.strategy,
            status: SwarmRunStatus::Pending,
            result: None,
            error: None,
            token_budget,
            tokens_in: 0,
            tokens_out: 0,
            initiator: initiator.into(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(strategy: SwarmStrategy, roles: &[&str]) -> SwarmTemplate {
        SwarmTemplate::new(
            "t",
            strategy,
            roles.iter().map(|r| SwarmRole::new(*r, *r)).collect(),
        )
    }

    #[test]
    fn test_template_validation() {
        assert!(template(SwarmStrategy::Sequential, &["a"]).validate().is_ok());
        assert!(template(SwarmStrategy::Sequential, &[]).validate().is_err());
        assert!(template(SwarmStrategy::Parallel, &[]).validate().is_err());
        // Dynamic runs on the coordinator alone
        assert!(template(SwarmStrategy::Dynamic, &[]).validate().is_ok());
    }

    #[test]
    fn test_run_snapshots_strategy() {
        let tpl = template(SwarmStrategy::Parallel, &["a", "b"]);
        let run = SwarmRun::new(&tpl, "do things", 100_000, "tester");
        assert_eq!(run.strategy, SwarmStrategy::Parallel);
        assert_eq!(run.status, SwarmRunStatus::Pending);
        assert_eq!(run.token_budget, 100_000);
    }

    #[test]
    fn test_cancellable_states() {
        assert!(SwarmRunStatus::Pending.cancellable());
        assert!(SwarmRunStatus::Running.cancellable());
        assert!(!SwarmRunStatus::Completed.cancellable());
        assert!(!SwarmRunStatus::Failed.cancellable());
        assert!(!SwarmRunStatus::Cancelled.cancellable());
    }

    #[test]
    fn test_strategy_round_trip() {
        for s in [
            SwarmStrategy::Sequential,
            SwarmStrategy::Parallel,
            SwarmStrategy::Dynamic,
        ] {
            assert_eq!(SwarmStrategy::parse_str(s.as_str()), Some(s));
        }
        assert_eq!(SwarmStrategy::parse_str("round-robin"), None);
    }
}
