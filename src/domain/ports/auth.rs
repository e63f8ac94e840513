//! Authentication port consumed by the gateway.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;

/// Who a bearer token resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
    pub role: String,
}

/// Token verification interface. The gateway never interprets tokens
/// itself.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Resolve a bearer token. `Ok(None)` means "unknown token".
    async fn authenticate(&self, token: &str) -> DomainResult<Option<Principal>>;
}
