//! Swarm routes, mirroring the SwarmManager operations.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::models::{SwarmRun, SwarmTemplate};
use crate::services::swarm_manager::{ExecuteSwarm, SwarmCostEstimate, SwarmRunView};

use super::auth::AuthenticatedUser;
use super::error::ApiResult;
use super::state::AppState;
use crate::domain::errors::DomainError;

#[derive(Debug, Deserialize)]
pub struct ExecuteSwarmRequest {
    #[serde(alias = "templateId")]
    pub template_id: Uuid,
    pub task: String,
    pub context: Option<String>,
    #[serde(alias = "tokenBudget")]
    pub token_budget: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct EstimateSwarmRequest {
    #[serde(alias = "templateId")]
    pub template_id: Uuid,
    pub task: String,
    pub context: Option<String>,
    #[serde(alias = "tokenBudget")]
    pub token_budget: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ListRunsQuery {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct TemplateListResponse {
    pub templates: Vec<SwarmTemplate>,
}

pub async fn list_templates(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> ApiResult<Json<TemplateListResponse>> {
    state.require(&user.0, "swarms", "read").await?;
    let templates = state.swarms.list_templates().await?;
    Ok(Json(TemplateListResponse { templates }))
}

pub async fn execute(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<ExecuteSwarmRequest>,
) -> ApiResult<(StatusCode, Json<SwarmRunView>)> {
    state.require(&user.0, "swarms", "execute").await?;

    if body.task.trim().is_empty() {
        return Err(DomainError::Validation("task is required".into()).into());
    }

    let view = state
        .swarms
        .execute_swarm(ExecuteSwarm {
            template_id: body.template_id,
            task: body.task,
            context: body.context,
            token_budget: body.token_budget,
            initiator: user.0.user_id.clone(),
        })
        .await?;
    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn estimate(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<EstimateSwarmRequest>,
) -> ApiResult<Json<SwarmCostEstimate>> {
    state.require(&user.0, "swarms", "read").await?;
    let estimate = state
        .swarms
        .estimate_swarm_cost(
            body.template_id,
            &body.task,
            body.token_budget,
            body.context.as_deref(),
        )
        .await?;
    Ok(Json(estimate))
}

pub async fn list_runs(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<ListRunsQuery>,
) -> ApiResult<Json<Vec<SwarmRun>>> {
    state.require(&user.0, "swarms", "read").await?;
    let runs = state
        .swarms
        .list_runs(query.limit.unwrap_or(50), query.offset.unwrap_or(0))
        .await?;
    Ok(Json(runs))
}

pub async fn get_run(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SwarmRunView>> {
    state.require(&user.0, "swarms", "read").await?;
    let view = state
        .swarms
        .get_run(id)
        .await?
        .ok_or_else(|| DomainError::not_found("swarm run", id.to_string()))?;
    Ok(Json(view))
}

pub async fn cancel_run(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SwarmRun>> {
    state.require(&user.0, "swarms", "cancel").await?;
    let run = state.swarms.cancel_swarm(id).await?;
    Ok(Json(run))
}
