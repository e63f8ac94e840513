//! Service layer: the orchestration subsystems.

pub mod audit_chain;
pub mod delegation;
pub mod input_validator;
pub mod integration_manager;
pub mod metrics;
pub mod rate_limiter;
pub mod rbac;
pub mod sandbox;
pub mod swarm_manager;
pub mod task_executor;

pub use audit_chain::{sha256_hex_of_value, AuditChain, RetentionPolicy, RetentionReport};
pub use delegation::{DelegationConfig, DelegationOutcome, DelegationRequest, DelegationService};
pub use input_validator::{InputValidator, Validation};
pub use integration_manager::{IntegrationManager, ReconnectConfig};
pub use metrics::{prometheus_text, MetricsService, MetricsSnapshot};
pub use rate_limiter::{RateDecision, RateLimiterService};
pub use rbac::RbacService;
pub use sandbox::{Sandbox, SandboxOutcome, SandboxViolation};
pub use swarm_manager::{ExecuteSwarm, SwarmCostEstimate, SwarmManager, SwarmRunView};
pub use task_executor::{
    ExecutionContext, SubmitTask, TaskEvent, TaskExecutor, TaskHandler,
};
