//! Domain error type shared across services.
//!
//! Every in-process boundary returns `DomainResult`; only the HTTP adapter
//! converts these semantic codes into transport status codes.

use thiserror::Error;

/// Result alias used throughout the domain and service layers.
pub type DomainResult<T> = Result<T, DomainError>;

/// Semantic error codes propagated between components.
#[derive(Debug, Error)]
pub enum DomainError {
    /// Bad input rejected before any side effect.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Admission denied by a rate limit rule.
    #[error("rate limited: retry after {retry_after_secs}s")]
    RateLimited {
        rule: String,
        retry_after_secs: u64,
    },

    /// RBAC or consent gate denied the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Missing template, task, profile, or integration.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Illegal state transition (e.g. cancelling a completed swarm).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Task or delegation ran past its deadline.
    #[error("timed out after {0}ms")]
    Timeout(u64),

    /// A handler or adapter raised; the message is preserved.
    #[error("execution failed: {0}")]
    Execution(String),

    /// Sandbox reported a violation severe enough to fail the operation.
    #[error("sandbox violation: {0}")]
    Sandbox(String),

    /// A required collaborator is not wired or not responding.
    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),

    /// Storage facade failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// The audit chain could not durably record an entry. Fatal to the
    /// operation being audited: the operation must not be acknowledged.
    #[error("audit write failed: {0}")]
    AuditWrite(String),

    /// Startup or reload configuration failure, with the field path.
    #[error("configuration error: {0}")]
    Config(String),
}

impl DomainError {
    /// Stable machine-readable code for wire responses and task results.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::PermissionDenied(_) => "PERMISSION_DENIED",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::Timeout(_) => "TIMEOUT",
            Self::Execution(_) => "EXECUTION_ERROR",
            Self::Sandbox(_) => "SANDBOX_VIOLATION",
            Self::DependencyUnavailable(_) => "DEPENDENCY_UNAVAILABLE",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::AuditWrite(_) => "AUDIT_WRITE_FAILED",
            Self::Config(_) => "CONFIG_ERROR",
        }
    }

    /// Whether a caller could reasonably retry the same request.
    pub fn recoverable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::Timeout(_)
                | Self::DependencyUnavailable(_)
                | Self::Storage(_)
        )
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }
}

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(format!("serialization: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_stable() {
        assert_eq!(DomainError::Validation("x".into()).code(), "VALIDATION");
        assert_eq!(
            DomainError::RateLimited {
                rule: "task_creation".into(),
                retry_after_secs: 3
            }
            .code(),
            "RATE_LIMITED"
        );
        assert_eq!(DomainError::Timeout(50).code(), "TIMEOUT");
        assert_eq!(
            DomainError::not_found("task", "abc").code(),
            "NOT_FOUND"
        );
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(DomainError::Timeout(10).recoverable());
        assert!(!DomainError::PermissionDenied("nope".into()).recoverable());
        assert!(!DomainError::Validation("bad".into()).recoverable());
    }
}
