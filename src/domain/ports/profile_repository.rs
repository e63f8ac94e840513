//! Agent profile repository port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::AgentProfile;

/// Repository interface for agent profiles.
#[async_trait]
pub trait ProfileRepository: Send + Sync {
    async fn create(&self, profile: &AgentProfile) -> DomainResult<()>;
    async fn get(&self, id: Uuid) -> DomainResult<Option<AgentProfile>>;
    async fn get_by_name(&self, name: &str) -> DomainResult<Option<AgentProfile>>;
    async fn list(&self) -> DomainResult<Vec<AgentProfile>>;
    async fn update(&self, profile: &AgentProfile) -> DomainResult<()>;
    async fn delete(&self, id: Uuid) -> DomainResult<()>;
}
