//! Domain ports (interfaces) consumed by the service layer.

pub mod audit_store;
pub mod auth;
pub mod delegation_repository;
pub mod integration;
pub mod integration_repository;
pub mod llm_client;
pub mod model_router;
pub mod null_llm;
pub mod profile_repository;
pub mod swarm_repository;
pub mod task_repository;

pub use audit_store::AuditStore;
pub use auth::{AuthProvider, Principal};
pub use delegation_repository::DelegationRepository;
pub use integration::{ConnectionTest, Integration, IntegrationDeps, IntegrationFactory};
pub use integration_repository::IntegrationRepository;
pub use llm_client::{CompletionRequest, CompletionResponse, LlmClient, ToolCall};
pub use model_router::{ModelRouter, RouteDecision, RouteRequest};
pub use null_llm::NullLlmClient;
pub use profile_repository::ProfileRepository;
pub use swarm_repository::SwarmRepository;
pub use task_repository::{TaskFilter, TaskPage, TaskRepository};
