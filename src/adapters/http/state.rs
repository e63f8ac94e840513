//! Shared gateway state and the RBAC hook every protected route runs.

use std::sync::Arc;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{AuditDraft, AuditEvent, GatewayConfig, PermissionCheck};
use crate::domain::ports::{AuthProvider, Principal, TaskRepository};
use crate::services::audit_chain::AuditChain;
use crate::services::metrics::MetricsService;
use crate::services::rbac::RbacService;
use crate::services::swarm_manager::SwarmManager;
use crate::services::task_executor::TaskExecutor;

use super::ws::WsHub;

/// Everything route handlers need.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub executor: Arc<TaskExecutor>,
    pub task_repo: Arc<dyn TaskRepository>,
    pub swarms: Arc<SwarmManager>,
    pub audit: Arc<AuditChain>,
    pub rbac: Arc<RbacService>,
    pub auth: Arc<dyn AuthProvider>,
    pub metrics: Arc<MetricsService>,
    pub hub: Arc<WsHub>,
}

impl AppState {
    /// RBAC hook: deny is audited as `permission_denied` before it is
    /// surfaced.
    pub async fn require(
        &self,
        principal: &Principal,
        resource: &str,
        action: &str,
    ) -> DomainResult<()> {
        let check = PermissionCheck::new(resource, action);
        match self
            .rbac
            .require_permission(&principal.role, &check, Some(&principal.user_id))
            .await
        {
            Ok(_) => Ok(()),
            Err(err @ DomainError::PermissionDenied(_)) => {
                self.audit
                    .record(
                        AuditDraft::warn(
                            AuditEvent::PermissionDenied,
                            format!(
                                "role '{}' denied {action} on {resource}",
                                principal.role
                            ),
                        )
                        .with_user(&principal.user_id),
                    )
                    .await?;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }
}
