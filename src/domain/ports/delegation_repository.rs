//! Delegation repository port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Delegation, DelegationMessage, TokenUsage};

/// Repository interface for delegation rows and their message traces.
#[async_trait]
pub trait DelegationRepository: Send + Sync {
    async fn create(&self, delegation: &Delegation) -> DomainResult<()>;
    async fn get(&self, id: Uuid) -> DomainResult<Option<Delegation>>;
    async fn update(&self, delegation: &Delegation) -> DomainResult<()>;

    /// Children of a delegation, oldest first.
    async fn list_children(&self, parent_id: Uuid) -> DomainResult<Vec<Delegation>>;

    /// Sum of tokens used by the whole tree rooted at `root_id`,
    /// including the root itself.
    async fn tree_token_usage(&self, root_id: Uuid) -> DomainResult<TokenUsage>;

    /// Append one trace message.
    async fn append_message(&self, message: &DelegationMessage) -> DomainResult<()>;

    /// Trace in `seq` order.
    async fn list_messages(&self, delegation_id: Uuid) -> DomainResult<Vec<DelegationMessage>>;
}
