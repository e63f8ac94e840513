//! Task routes.

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use uuid::Uuid;

use crate::domain::errors::DomainError;
use crate::domain::models::{SecurityContext, Task, TaskStatus, TaskType};
use crate::domain::ports::{TaskFilter, TaskRepository};
use crate::services::task_executor::SubmitTask;

use super::auth::AuthenticatedUser;
use super::error::{ApiError, ApiResult};
use super::peer::OptionalConnectInfo;
use super::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    #[serde(rename = "type")]
    pub task_type: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub input: serde_json::Value,
    #[serde(alias = "timeoutMs")]
    pub timeout_ms: Option<u64>,
    #[serde(alias = "correlationId")]
    pub correlation_id: Option<Uuid>,
    #[serde(alias = "parentTaskId")]
    pub parent_task_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    pub status: Option<String>,
    #[serde(rename = "type")]
    pub task_type: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct TaskListResponse {
    pub tasks: Vec<Task>,
    pub total: u64,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTaskRequest {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub task_type: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

fn security_context(
    user: &AuthenticatedUser,
    peer: Option<&SocketAddr>,
    headers: &HeaderMap,
) -> SecurityContext {
    let mut ctx = SecurityContext::new(&user.0.user_id, &user.0.role);
    if let Some(peer) = peer {
        ctx.ip_address = Some(peer.ip().to_string());
    }
    if let Some(agent) = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
    {
        ctx.user_agent = Some(agent.to_string());
    }
    ctx
}

pub async fn create(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    connect_info: OptionalConnectInfo,
    headers: HeaderMap,
    Json(body): Json<CreateTaskRequest>,
) -> ApiResult<(StatusCode, Json<Task>)> {
    state.require(&user.0, "tasks", "create").await?;

    let name = body
        .name
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| DomainError::Validation("name is required".into()))?;
    let task_type = match body.task_type.as_deref() {
        Some(raw) => TaskType::parse_str(raw)
            .ok_or_else(|| DomainError::Validation(format!("unknown task type '{raw}'")))?,
        None => TaskType::Standard,
    };

    let submit = SubmitTask {
        task_type,
        name,
        description: body.description,
        input: body.input,
        timeout_ms: body.timeout_ms,
        correlation_id: body.correlation_id,
        parent_task_id: body.parent_task_id,
    };
    let security = security_context(&user, connect_info.0.as_ref(), &headers);

    let task = state.executor.submit(submit, security).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn list(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<ListTasksQuery>,
) -> ApiResult<Json<TaskListResponse>> {
    state.require(&user.0, "tasks", "read").await?;

    let filter = TaskFilter {
        status: query
            .status
            .as_deref()
            .map(|raw| {
                TaskStatus::parse_str(raw)
                    .ok_or_else(|| DomainError::Validation(format!("unknown status '{raw}'")))
            })
            .transpose()?,
        task_type: query
            .task_type
            .as_deref()
            .map(|raw| {
                TaskType::parse_str(raw)
                    .ok_or_else(|| DomainError::Validation(format!("unknown task type '{raw}'")))
            })
            .transpose()?,
        user_id: None,
        from: query.from,
        to: query.to,
        limit: Some(query.limit.unwrap_or(50)),
        offset: query.offset,
    };

    let page = state.task_repo.list(filter).await?;
    Ok(Json(TaskListResponse {
        tasks: page.tasks,
        total: page.total,
    }))
}

pub async fn get(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Task>> {
    state.require(&user.0, "tasks", "read").await?;
    let task = state
        .task_repo
        .get(id)
        .await?
        .ok_or_else(|| DomainError::not_found("task", id.to_string()))?;
    Ok(Json(task))
}

/// Metadata-only update: name, type, description.
pub async fn update(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateTaskRequest>,
) -> ApiResult<Json<Task>> {
    state.require(&user.0, "tasks", "update").await?;

    let mut task = state
        .task_repo
        .get(id)
        .await?
        .ok_or_else(|| DomainError::not_found("task", id.to_string()))?;

    if let Some(name) = body.name {
        if name.trim().is_empty() {
            return Err(ApiError::from(DomainError::Validation(
                "name must not be empty".into(),
            )));
        }
        task.name = name;
    }
    if let Some(raw) = body.task_type.as_deref() {
        task.task_type = TaskType::parse_str(raw)
            .ok_or_else(|| DomainError::Validation(format!("unknown task type '{raw}'")))?;
    }
    if let Some(description) = body.description {
        task.description = Some(description);
    }

    state.task_repo.update(&task).await?;
    Ok(Json(task))
}

pub async fn delete(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.require(&user.0, "tasks", "delete").await?;
    state.task_repo.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn cancel(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    connect_info: OptionalConnectInfo,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<CancelResponse>> {
    let security = security_context(&user, connect_info.0.as_ref(), &headers);
    let cancelled = state.executor.cancel(id, &security).await?;
    Ok(Json(CancelResponse { cancelled }))
}
