//! Curated security-event projection over the audit chain.

use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::errors::DomainError;
use crate::domain::models::{AuditFilter, AuditLevel};

use super::auth::AuthenticatedUser;
use super::error::ApiResult;
use super::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SecurityEventsQuery {
    /// Exact level match (`warn`, `error`, ...).
    pub severity: Option<String>,
    /// Projection type (`auth`, `rate_limit`, `injection_attempt`, ...).
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct SecurityEvent {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub severity: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub event: String,
    pub message: String,
    pub user_id: Option<String>,
    pub task_id: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct SecurityEventsResponse {
    pub events: Vec<SecurityEvent>,
    pub total: usize,
}

pub async fn events(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(params): Query<SecurityEventsQuery>,
) -> ApiResult<Json<SecurityEventsResponse>> {
    state.require(&user.0, "security_events", "read").await?;

    let severity = params
        .severity
        .as_deref()
        .map(|raw| {
            AuditLevel::parse_str(raw)
                .ok_or_else(|| DomainError::Validation(format!("unknown severity '{raw}'")))
        })
        .transpose()?;

    // Over-fetch from the chain, then project the curated subset
    let mut filter = AuditFilter::new();
    filter.from = params.from;
    filter.to = params.to;
    filter.limit = None;
    let entries = state.audit.query(filter).await?;

    let projected: Vec<SecurityEvent> = entries
        .into_iter()
        .filter_map(|entry| {
            let kind = entry.event.security_kind()?;
            if let Some(severity) = severity {
                if entry.level != severity {
                    return None;
                }
            }
            if let Some(wanted) = params.event_type.as_deref() {
                if kind != wanted {
                    return None;
                }
            }
            Some(SecurityEvent {
                seq: entry.seq,
                timestamp: entry.timestamp,
                severity: entry.level.as_str().to_string(),
                event_type: kind.to_string(),
                event: entry.event.as_str().to_string(),
                message: entry.message,
                user_id: entry.user_id,
                task_id: entry.task_id,
                metadata: entry.metadata,
            })
        })
        .collect();

    let total = projected.len();
    let offset = params.offset.unwrap_or(0) as usize;
    let limit = params.limit.unwrap_or(50) as usize;
    let events = projected
        .into_iter()
        .skip(offset)
        .take(limit)
        .collect();

    Ok(Json(SecurityEventsResponse { events, total }))
}
