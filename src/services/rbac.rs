//! Role-based access control with conditioned permissions and a bounded
//! decision cache.

use moka::future::Cache;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Permission, PermissionCheck, PermissionDecision};
use crate::services::audit_chain::sha256_hex_of_value;

/// Decisions are cached this long.
const CACHE_TTL: Duration = Duration::from_secs(300);
/// Upper bound on cached decisions.
const CACHE_MAX_CAPACITY: u64 = 1_000;

/// Role -> permission evaluator shared across subsystems.
pub struct RbacService {
    roles: RwLock<HashMap<String, Vec<Permission>>>,
    /// Decision cache keyed by `role:resource:action:context-hash`.
    cache: Cache<String, PermissionDecision>,
}

impl RbacService {
    pub fn new() -> Self {
        Self {
            roles: RwLock::new(HashMap::new()),
            cache: Cache::builder()
                .max_capacity(CACHE_MAX_CAPACITY)
                .time_to_live(CACHE_TTL)
                .build(),
        }
    }

    /// The standard role set: `admin` can do anything, `operator` runs
    /// work and reads everything, `viewer` only reads.
    pub async fn with_default_roles() -> Arc<Self> {
        let service = Arc::new(Self::new());
        service
            .set_role("admin", vec![Permission::new("*", "*")])
            .await;
        service
            .set_role(
                "operator",
                vec![
                    Permission::new("tasks", "*"),
                    Permission::new("swarms", "*"),
                    Permission::new("integrations", "*"),
                    Permission::new("metrics", "read"),
                    Permission::new("audit", "read"),
                    Permission::new("security_events", "read"),
                ],
            )
            .await;
        service
            .set_role(
                "viewer",
                vec![
                    Permission::new("tasks", "read"),
                    Permission::new("swarms", "read"),
                    Permission::new("metrics", "read"),
                ],
            )
            .await;
        service
    }

    /// Install or replace a role. Any mutation invalidates every cached
    /// decision.
    pub async fn set_role(&self, role: impl Into<String>, permissions: Vec<Permission>) {
        self.roles.write().await.insert(role.into(), permissions);
        self.cache.invalidate_all();
    }

    /// Remove a role. Also clears the cache.
    pub async fn remove_role(&self, role: &str) -> bool {
        let removed = self.roles.write().await.remove(role).is_some();
        self.cache.invalidate_all();
        removed
    }

    pub async fn roles(&self) -> Vec<String> {
        self.roles.read().await.keys().cloned().collect()
    }

    /// Evaluate a permission check for `role`. `user_id`, when given, is
    /// visible to conditions as the `user_id` context field.
    pub async fn check_permission(
        &self,
        role: &str,
        check: &PermissionCheck,
        user_id: Option<&str>,
    ) -> PermissionDecision {
        let context = effective_context(check, user_id);
        let cache_key = format!(
            "{role}:{}:{}:{}",
            check.resource,
            check.action,
            context
                .as_ref()
                .map(sha256_hex_of_value)
                .unwrap_or_default()
        );

        if let Some(cached) = self.cache.get(&cache_key).await {
            return cached;
        }

        let decision = self.evaluate(role, check, context.as_ref()).await;
        self.cache.insert(cache_key, decision.clone()).await;
        decision
    }

    /// As `check_permission`, but denial is an error.
    pub async fn require_permission(
        &self,
        role: &str,
        check: &PermissionCheck,
        user_id: Option<&str>,
    ) -> DomainResult<PermissionDecision> {
        let decision = self.check_permission(role, check, user_id).await;
        if decision.granted {
            Ok(decision)
        } else {
            Err(DomainError::PermissionDenied(format!(
                "role '{role}' may not {} on {}",
                check.action, check.resource
            )))
        }
    }

    async fn evaluate(
        &self,
        role: &str,
        check: &PermissionCheck,
        context: Option<&serde_json::Value>,
    ) -> PermissionDecision {
        let roles = self.roles.read().await;
        let Some(permissions) = roles.get(role) else {
            return PermissionDecision::denied(format!("unknown role '{role}'"));
        };

        for permission in permissions {
            if !permission.covers(&check.resource, &check.action) {
                continue;
            }
            let conditions_met = match context {
                Some(ctx) => permission.conditions.iter().all(|c| c.evaluate(ctx)),
                // Conditioned grants require a context to evaluate against
                None => permission.conditions.is_empty(),
            };
            if conditions_met {
                return PermissionDecision::granted(permission.clone());
            }
        }

        PermissionDecision::denied(format!(
            "no permission grants {} on {} for role '{role}'",
            check.action, check.resource
        ))
    }
}

impl Default for RbacService {
    fn default() -> Self {
        Self::new()
    }
}

fn effective_context(check: &PermissionCheck, user_id: Option<&str>) -> Option<serde_json::Value> {
    match (&check.context, user_id) {
        (Some(ctx), Some(uid)) => {
            let mut merged = ctx.clone();
            if let Some(obj) = merged.as_object_mut() {
                obj.insert("user_id".into(), serde_json::Value::String(uid.into()));
            }
            Some(merged)
        }
        (Some(ctx), None) => Some(ctx.clone()),
        (None, Some(uid)) => Some(serde_json::json!({ "user_id": uid })),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ConditionOperator;
    use serde_json::json;

    #[tokio::test]
    async fn test_admin_wildcard() {
        let rbac = RbacService::with_default_roles().await;
        let decision = rbac
            .check_permission("admin", &PermissionCheck::new("tasks", "cancel"), None)
            .await;
        assert!(decision.granted);
        assert!(decision.matched_permission.is_some());
    }

    #[tokio::test]
    async fn test_viewer_denied_cancel() {
        let rbac = RbacService::with_default_roles().await;
        let decision = rbac
            .check_permission("viewer", &PermissionCheck::new("tasks", "cancel"), None)
            .await;
        assert!(!decision.granted);
        assert!(decision.reason.unwrap().contains("viewer"));
    }

    #[tokio::test]
    async fn test_unknown_role_denied() {
        let rbac = RbacService::with_default_roles().await;
        let decision = rbac
            .check_permission("ghost", &PermissionCheck::new("tasks", "read"), None)
            .await;
        assert!(!decision.granted);
    }

    #[tokio::test]
    async fn test_require_permission_throws() {
        let rbac = RbacService::with_default_roles().await;
        let err = rbac
            .require_permission("viewer", &PermissionCheck::new("tasks", "cancel"), None)
            .await;
        assert!(matches!(err, Err(DomainError::PermissionDenied(_))));
    }

    #[tokio::test]
    async fn test_conditions_against_context() {
        let rbac = RbacService::new();
        rbac.set_role(
            "restricted",
            vec![Permission::new("tasks", "create").with_condition(
                "budget",
                ConditionOperator::Lte,
                json!(1000),
            )],
        )
        .await;

        let within = PermissionCheck::new("tasks", "create").with_context(json!({"budget": 500}));
        assert!(rbac.check_permission("restricted", &within, None).await.granted);

        let over = PermissionCheck::new("tasks", "create").with_context(json!({"budget": 5000}));
        assert!(!rbac.check_permission("restricted", &over, None).await.granted);

        // No context at all: conditioned grant cannot apply
        let bare = PermissionCheck::new("tasks", "create");
        assert!(!rbac.check_permission("restricted", &bare, None).await.granted);
    }

    #[tokio::test]
    async fn test_user_id_visible_to_conditions() {
        let rbac = RbacService::new();
        rbac.set_role(
            "self_service",
            vec![Permission::new("tasks", "cancel").with_condition(
                "user_id",
                ConditionOperator::Eq,
                json!("u1"),
            )],
        )
        .await;

        let check = PermissionCheck::new("tasks", "cancel");
        assert!(rbac.check_permission("self_service", &check, Some("u1")).await.granted);
        assert!(!rbac.check_permission("self_service", &check, Some("u2")).await.granted);
    }

    #[tokio::test]
    async fn test_cache_cleared_on_role_mutation() {
        let rbac = RbacService::new();
        rbac.set_role("r", vec![Permission::new("tasks", "read")]).await;

        let check = PermissionCheck::new("tasks", "read");
        assert!(rbac.check_permission("r", &check, None).await.granted);

        // A stale cached grant would survive this mutation if the cache
        // were not invalidated
        rbac.set_role("r", vec![]).await;
        assert!(!rbac.check_permission("r", &check, None).await.granted);
    }

    #[tokio::test]
    async fn test_cache_capacity_is_bounded() {
        let rbac = RbacService::new();
        rbac.set_role("r", vec![Permission::new("*", "*")]).await;

        for i in 0..(CACHE_MAX_CAPACITY + 50) {
            let check = PermissionCheck::new(format!("res{i}"), "read");
            rbac.check_permission("r", &check, None).await;
        }

        rbac.cache.run_pending_tasks().await;
        assert!(
            rbac.cache.entry_count() <= CACHE_MAX_CAPACITY,
            "cache grew to {}",
            rbac.cache.entry_count()
        );
    }
}
