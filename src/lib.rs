//! Warden - secure local-first agent orchestration core.
//!
//! The orchestration and execution substrate for a local AI-agent platform:
//! - Admission-controlled task executor with timeouts, cancellation, and sandboxing
//! - Sub-agent delegation and swarm strategies (sequential / parallel / dynamic)
//! - Integration manager with health probing and rate-limited sends
//! - HTTP/WebSocket gateway with RBAC-filtered pub/sub
//! - Tamper-evident hash-chained audit log

pub mod adapters;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export key types for convenience
pub use adapters::sqlite::DatabaseConnection;
pub use domain::errors::{DomainError, DomainResult};
