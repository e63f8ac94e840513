//! Audit chain routes: query, verify, stats, export, retention.

use axum::extract::{Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::domain::errors::DomainError;
use crate::domain::models::{AuditEntry, AuditEvent, AuditFilter, AuditLevel};
use crate::services::audit_chain::RetentionPolicy;

use super::auth::AuthenticatedUser;
use super::error::ApiResult;
use super::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AuditQueryParams {
    pub level: Option<String>,
    pub event: Option<String>,
    #[serde(alias = "userId")]
    pub user_id: Option<String>,
    #[serde(alias = "taskId")]
    pub task_id: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct ExportParams {
    #[serde(alias = "fromSeq")]
    pub from_seq: Option<u64>,
    #[serde(alias = "toSeq")]
    pub to_seq: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct RetentionRequest {
    #[serde(alias = "maxAgeDays")]
    pub max_age_days: Option<u32>,
    #[serde(alias = "maxEntries")]
    pub max_entries: Option<u64>,
}

fn build_filter(params: AuditQueryParams) -> Result<AuditFilter, DomainError> {
    let mut filter = AuditFilter::new();
    if let Some(raw) = params.level.as_deref() {
        filter.min_level = Some(
            AuditLevel::parse_str(raw)
                .ok_or_else(|| DomainError::Validation(format!("unknown level '{raw}'")))?,
        );
    }
    if let Some(raw) = params.event.as_deref() {
        filter.event = Some(
            AuditEvent::parse_str(raw)
                .ok_or_else(|| DomainError::Validation(format!("unknown event '{raw}'")))?,
        );
    }
    filter.user_id = params.user_id;
    filter.task_id = params.task_id;
    filter.from = params.from;
    filter.to = params.to;
    filter.limit = Some(params.limit.unwrap_or(50));
    filter.offset = params.offset;
    Ok(filter)
}

pub async fn query(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(params): Query<AuditQueryParams>,
) -> ApiResult<Json<Vec<AuditEntry>>> {
    state.require(&user.0, "audit", "read").await?;
    let filter = build_filter(params)?;
    let entries = state.audit.query(filter).await?;
    Ok(Json(entries))
}

pub async fn verify(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> ApiResult<Json<serde_json::Value>> {
    state.require(&user.0, "audit", "read").await?;
    let report = state.audit.verify().await?;
    Ok(Json(serde_json::json!({
        "ok": report.ok,
        "firstBrokenSeq": report.first_broken_seq,
        "entriesChecked": report.entries_checked,
    })))
}

pub async fn stats(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> ApiResult<Json<crate::domain::models::AuditStats>> {
    state.require(&user.0, "audit", "read").await?;
    let stats = state.audit.stats().await?;
    Ok(Json(stats))
}

/// Bulk dump as a JSON attachment.
pub async fn export(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(params): Query<ExportParams>,
) -> ApiResult<impl IntoResponse> {
    state.require(&user.0, "audit", "read").await?;

    let from = params.from_seq.unwrap_or(0);
    let to = params.to_seq.unwrap_or(u64::MAX);
    if from > to {
        return Err(DomainError::Validation("from_seq must not exceed to_seq".into()).into());
    }
    let entries = state.audit.export(from, to).await?;
    let body = serde_json::to_string_pretty(&entries)
        .map_err(|e| DomainError::Storage(e.to_string()))?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/json".to_string()),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"audit-export.json\"".to_string(),
            ),
        ],
        body,
    ))
}

pub async fn retention(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<RetentionRequest>,
) -> ApiResult<Json<crate::services::audit_chain::RetentionReport>> {
    state.require(&user.0, "audit", "admin").await?;

    if let Some(days) = body.max_age_days {
        if !(1..=3650).contains(&days) {
            return Err(
                DomainError::Validation("max_age_days must be in [1, 3650]".into()).into(),
            );
        }
    }
    if let Some(entries) = body.max_entries {
        if !(100..=10_000_000).contains(&entries) {
            return Err(DomainError::Validation(
                "max_entries must be in [100, 10000000]".into(),
            )
            .into());
        }
    }
    if body.max_age_days.is_none() && body.max_entries.is_none() {
        return Err(DomainError::Validation(
            "at least one of max_age_days or max_entries is required".into(),
        )
        .into());
    }

    let report = state
        .audit
        .enforce_retention(RetentionPolicy {
            max_age_days: body.max_age_days,
            max_entries: body.max_entries,
        })
        .await?;
    Ok(Json(report))
}
