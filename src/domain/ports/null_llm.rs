//! Null LLM client for deployments with no provider wired. Delegations
//! fail fast with DEPENDENCY_UNAVAILABLE instead of hanging.

use async_trait::async_trait;

use crate::domain::errors::{DomainError, DomainResult};

use super::llm_client::{CompletionRequest, CompletionResponse, LlmClient};

#[derive(Debug, Default, Clone, Copy)]
pub struct NullLlmClient;

#[async_trait]
impl LlmClient for NullLlmClient {
    async fn complete(&self, _request: CompletionRequest) -> DomainResult<CompletionResponse> {
        Err(DomainError::DependencyUnavailable(
            "no LLM provider is configured".into(),
        ))
    }
}
