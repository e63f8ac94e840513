//! Liveness and metrics endpoints. Both are unauthenticated: the gateway
//! only ever binds loopback/private addresses.

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::domain::models::TaskStatus;
use crate::domain::ports::TaskRepository;
use crate::services::metrics::prometheus_text;

use super::error::ApiResult;
use super::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub dependencies: Dependencies,
}

#[derive(Debug, Serialize)]
pub struct Dependencies {
    pub database: bool,
    pub audit_chain: bool,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = state
        .task_repo
        .count_by_status(TaskStatus::Running)
        .await
        .is_ok();
    let audit_chain = state.audit.stats().await.is_ok();
    let status = if database && audit_chain {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status,
        uptime_secs: state.metrics.uptime_secs(),
        dependencies: Dependencies {
            database,
            audit_chain,
        },
    })
}

/// Prometheus text exposition.
pub async fn metrics(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let snapshot = state.metrics.snapshot().await?;
    Ok((
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        prometheus_text(&snapshot),
    ))
}
