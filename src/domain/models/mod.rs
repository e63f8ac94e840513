//! Domain models.

pub mod audit;
pub mod config;
pub mod delegation;
pub mod integration;
pub mod profile;
pub mod rbac;
pub mod swarm;
pub mod task;

pub use audit::{
    AuditDraft, AuditEntry, AuditEvent, AuditFilter, AuditLevel, AuditStats, VerifyReport,
};
pub use config::{
    AuditConfig, AuthTokenConfig, Config, DatabaseConfig, ExecutorConfig, GatewayConfig,
    IntegrationDefaults, LogConfig, LogFormat, RateKeyType, RateOnExceed, RateRuleConfig,
    RotationPolicy, SandboxConfig, SwarmConfig, TlsConfig, ValidationConfig,
};
pub use delegation::{
    Delegation, DelegationMessage, DelegationStatus, MessageRole, TokenUsage,
};
pub use integration::{
    IntegrationConfigRecord, IntegrationMessage, IntegrationStatus, MessageDirection,
    RateLimitSpec, UnifiedMessage,
};
pub use profile::{AgentProfile, ProfileKind};
pub use rbac::{Condition, ConditionOperator, Permission, PermissionCheck, PermissionDecision};
pub use swarm::{
    SwarmMember, SwarmMemberStatus, SwarmRole, SwarmRun, SwarmRunStatus, SwarmStrategy,
    SwarmTemplate,
};
pub use task::{
    ErrorInfo, ResourceUsage, SecurityContext, Task, TaskOutcome, TaskStatus, TaskType,
};
