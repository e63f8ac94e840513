//! Swarm template / run / member repository port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{SwarmMember, SwarmRun, SwarmTemplate};

/// Repository interface for swarm persistence.
#[async_trait]
pub trait SwarmRepository: Send + Sync {
    // Templates
    async fn create_template(&self, template: &SwarmTemplate) -> DomainResult<()>;
    async fn get_template(&self, id: Uuid) -> DomainResult<Option<SwarmTemplate>>;
    async fn get_template_by_name(&self, name: &str) -> DomainResult<Option<SwarmTemplate>>;
    async fn list_templates(&self) -> DomainResult<Vec<SwarmTemplate>>;
    async fn delete_template(&self, id: Uuid) -> DomainResult<()>;

    // Runs
    async fn create_run(&self, run: &SwarmRun) -> DomainResult<()>;
    async fn get_run(&self, id: Uuid) -> DomainResult<Option<SwarmRun>>;
    async fn update_run(&self, run: &SwarmRun) -> DomainResult<()>;
    /// Newest first.
    async fn list_runs(&self, limit: u32, offset: u32) -> DomainResult<Vec<SwarmRun>>;

    // Members
    async fn create_member(&self, member: &SwarmMember) -> DomainResult<()>;
    async fn update_member(&self, member: &SwarmMember) -> DomainResult<()>;
    /// Ordered by `seq_order`.
    async fn list_members(&self, run_id: Uuid) -> DomainResult<Vec<SwarmMember>>;
}
