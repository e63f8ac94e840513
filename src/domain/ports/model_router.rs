//! Cost-aware model router port. Purely advisory: the swarm manager only
//! applies an override when the router is present and confident.

use async_trait::async_trait;
use serde::Serialize;

use crate::domain::errors::DomainResult;

/// What the router is asked to route.
#[derive(Debug, Clone)]
pub struct RouteRequest {
    pub task: String,
    pub context: Option<String>,
    pub allowed_models: Vec<String>,
    pub token_budget: u64,
}

/// The router's advice.
#[derive(Debug, Clone, Serialize)]
pub struct RouteDecision {
    pub selected_model: String,
    pub estimated_cost_usd: f64,
    /// In `[0, 1]`. Overrides below 0.5 are ignored by callers.
    pub confidence: f64,
}

/// Advisory routing interface.
#[async_trait]
pub trait ModelRouter: Send + Sync {
    async fn route(&self, request: RouteRequest) -> DomainResult<RouteDecision>;
}
