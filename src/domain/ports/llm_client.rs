//! LLM client port. Concrete provider clients are external collaborators;
//! the delegation service only consumes this interface.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::errors::DomainResult;
use crate::domain::models::TokenUsage;

/// A tool invocation produced by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    pub arguments: serde_json::Value,
}

/// One completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub context: Option<String>,
    /// Tools the model is offered. The delegation service additionally
    /// suppresses any call outside this list.
    pub tools: Vec<String>,
    pub model: String,
    pub max_tokens: u64,
}

/// The provider's answer.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub text: String,
    pub tokens: TokenUsage,
    pub tool_calls: Vec<ToolCall>,
}

/// Minimal completion interface every provider adapter implements.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> DomainResult<CompletionResponse>;
}
