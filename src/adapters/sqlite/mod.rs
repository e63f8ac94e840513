//! SQLite implementations of the repository ports.

pub mod audit_store;
pub mod connection;
pub mod delegation_repository;
pub mod integration_repository;
pub mod profile_repository;
pub mod swarm_repository;
pub mod task_repository;

pub use audit_store::SqliteAuditStore;
pub use connection::DatabaseConnection;
pub use delegation_repository::SqliteDelegationRepository;
pub use integration_repository::SqliteIntegrationRepository;
pub use profile_repository::SqliteProfileRepository;
pub use swarm_repository::SqliteSwarmRepository;
pub use task_repository::SqliteTaskRepository;
