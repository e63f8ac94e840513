//! Integration configuration / message repository port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{IntegrationConfigRecord, IntegrationMessage};

/// Repository interface for integration bindings and message history.
#[async_trait]
pub trait IntegrationRepository: Send + Sync {
    async fn create(&self, record: &IntegrationConfigRecord) -> DomainResult<()>;
    async fn get(&self, id: Uuid) -> DomainResult<Option<IntegrationConfigRecord>>;
    async fn update(&self, record: &IntegrationConfigRecord) -> DomainResult<()>;
    async fn delete(&self, id: Uuid) -> DomainResult<()>;
    async fn list(&self) -> DomainResult<Vec<IntegrationConfigRecord>>;
    async fn list_enabled(&self) -> DomainResult<Vec<IntegrationConfigRecord>>;

    /// Persist one inbound/outbound message row.
    async fn append_message(&self, message: &IntegrationMessage) -> DomainResult<()>;

    /// Message history for one integration, newest first.
    async fn list_messages(
        &self,
        integration_id: Uuid,
        limit: u32,
    ) -> DomainResult<Vec<IntegrationMessage>>;
}
