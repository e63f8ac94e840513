//! Gateway authentication: bearer tokens resolved against the configured
//! principal table, exposed as an axum extractor.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use std::collections::HashMap;

use crate::domain::errors::DomainResult;
use crate::domain::models::{AuditDraft, AuditEvent, AuthTokenConfig};
use crate::domain::ports::{AuthProvider, Principal};

use super::error::ApiError;
use super::state::AppState;

/// Config-driven token table. Token values come from the environment at
/// startup; config files never hold them.
pub struct StaticTokenAuth {
    tokens: HashMap<String, Principal>,
}

impl StaticTokenAuth {
    /// Resolve each configured `token_env`. Missing variables are startup
    /// failures, reported with the config field path.
    pub fn from_config(entries: &[AuthTokenConfig]) -> DomainResult<Self> {
        let mut tokens = HashMap::new();
        for (index, entry) in entries.iter().enumerate() {
            let token = std::env::var(&entry.token_env).map_err(|_| {
                crate::domain::errors::DomainError::Config(format!(
                    "gateway.auth_tokens[{index}].token_env: required secret {} not set",
                    entry.token_env
                ))
            })?;
            tokens.insert(
                token,
                Principal {
                    user_id: entry.user_id.clone(),
                    role: entry.role.clone(),
                },
            );
        }
        Ok(Self { tokens })
    }

    /// Fixed table, used by tests.
    pub fn with_tokens(tokens: Vec<(String, Principal)>) -> Self {
        Self {
            tokens: tokens.into_iter().collect(),
        }
    }
}

#[async_trait]
impl AuthProvider for StaticTokenAuth {
    async fn authenticate(&self, token: &str) -> DomainResult<Option<Principal>> {
        Ok(self.tokens.get(token).cloned())
    }
}

/// Extractor that runs the auth hook on every non-public route.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub Principal);

impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim);

        let Some(token) = token else {
            return Err(ApiError::Unauthorized);
        };

        match state.auth.authenticate(token).await {
            Ok(Some(principal)) => Ok(Self(principal)),
            Ok(None) => {
                let _ = state
                    .audit
                    .record(AuditDraft::warn(
                        AuditEvent::AuthFailure,
                        "rejected unknown bearer token",
                    ))
                    .await;
                Err(ApiError::Unauthorized)
            }
            Err(err) => Err(ApiError::from(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_token_lookup() {
        let auth = StaticTokenAuth::with_tokens(vec![(
            "secret-token".to_string(),
            Principal {
                user_id: "u1".into(),
                role: "admin".into(),
            },
        )]);
        let hit = auth.authenticate("secret-token").await.unwrap();
        assert_eq!(hit.unwrap().role, "admin");
        assert!(auth.authenticate("wrong").await.unwrap().is_none());
    }

    #[test]
    fn test_missing_env_reports_field_path() {
        let entries = vec![AuthTokenConfig {
            token_env: "WARDEN_TEST_TOKEN_THAT_DOES_NOT_EXIST".into(),
            user_id: "u1".into(),
            role: "admin".into(),
        }];
        let err = StaticTokenAuth::from_config(&entries).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("gateway.auth_tokens[0].token_env"));
        assert!(message.contains("required secret"));
    }
}
