//! SQLite implementation of the DelegationRepository.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Delegation, DelegationMessage, DelegationStatus, MessageRole, TokenUsage,
};
use crate::domain::ports::DelegationRepository;

use super::task_repository::{parse_timestamp, parse_uuid};

#[derive(Clone)]
pub struct SqliteDelegationRepository {
    pool: SqlitePool,
}

impl SqliteDelegationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct DelegationRow {
    id: String,
    profile_id: String,
    profile_name: String,
    parent_id: Option<String>,
    task: String,
    context: Option<String>,
    depth: i64,
    max_depth: i64,
    token_budget: i64,
    timeout_ms: i64,
    model: String,
    status: String,
    result: Option<String>,
    error: Option<String>,
    tokens_prompt: i64,
    tokens_completion: i64,
    tokens_cached: i64,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
}

impl TryFrom<DelegationRow> for Delegation {
    type Error = DomainError;

    fn try_from(row: DelegationRow) -> Result<Self, Self::Error> {
        Ok(Delegation {
            id: parse_uuid(&row.id)?,
            profile_id: parse_uuid(&row.profile_id)?,
            profile_name: row.profile_name,
            parent_id: row.parent_id.as_deref().map(parse_uuid).transpose()?,
            task: row.task,
            context: row.context,
            depth: u32::try_from(row.depth).unwrap_or(0),
            max_depth: u32::try_from(row.max_depth).unwrap_or(0),
            token_budget: u64::try_from(row.token_budget).unwrap_or(0),
            timeout_ms: u64::try_from(row.timeout_ms).unwrap_or(0),
            model: row.model,
            status: DelegationStatus::parse_str(&row.status)
                .ok_or_else(|| DomainError::Storage(format!("bad status '{}'", row.status)))?,
            result: row.result,
            error: row.error,
            tokens: TokenUsage {
                prompt: u64::try_from(row.tokens_prompt).unwrap_or(0),
                completion: u64::try_from(row.tokens_completion).unwrap_or(0),
                cached: u64::try_from(row.tokens_cached).unwrap_or(0),
            },
            created_at: parse_timestamp(&row.created_at)?,
            started_at: row.started_at.as_deref().map(parse_timestamp).transpose()?,
            completed_at: row.completed_at.as_deref().map(parse_timestamp).transpose()?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: String,
    delegation_id: String,
    seq: i64,
    role: String,
    content: String,
    tool_calls: Option<String>,
    tool_result: Option<String>,
    token_count: i64,
}

impl TryFrom<MessageRow> for DelegationMessage {
    type Error = DomainError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        Ok(DelegationMessage {
            id: parse_uuid(&row.id)?,
            delegation_id: parse_uuid(&row.delegation_id)?,
            seq: u32::try_from(row.seq).unwrap_or(0),
            role: MessageRole::parse_str(&row.role)
                .ok_or_else(|| DomainError::Storage(format!("bad role '{}'", row.role)))?,
            content: row.content,
            tool_calls: row
                .tool_calls
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            tool_result: row
                .tool_result
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            token_count: u64::try_from(row.token_count).unwrap_or(0),
        })
    }
}

#[async_trait]
impl DelegationRepository for SqliteDelegationRepository {
    async fn create(&self, delegation: &Delegation) -> DomainResult<()> {
        sqlx::query(
            r"INSERT INTO delegations (id, profile_id, profile_name, parent_id, task, context,
               depth, max_depth, token_budget, timeout_ms, model, status, result, error,
               tokens_prompt, tokens_completion, tokens_cached, created_at, started_at, completed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(delegation.id.to_string())
        .bind(delegation.profile_id.to_string())
        .bind(&delegation.profile_name)
        .bind(delegation.parent_id.map(|id| id.to_string()))
        .bind(&delegation.task)
        .bind(&delegation.context)
        .bind(i64::from(delegation.depth))
        .bind(i64::from(delegation.max_depth))
        .bind(i64::try_from(delegation.token_budget).unwrap_or(i64::MAX))
        .bind(i64::try_from(delegation.timeout_ms).unwrap_or(i64::MAX))
        .bind(&delegation.model)
        .bind(delegation.status.as_str())
        .bind(&delegation.result)
        .bind(&delegation.error)
        .bind(i64::try_from(delegation.tokens.prompt).unwrap_or(0))
        .bind(i64::try_from(delegation.tokens.completion).unwrap_or(0))
        .bind(i64::try_from(delegation.tokens.cached).unwrap_or(0))
        .bind(delegation.created_at.to_rfc3339())
        .bind(delegation.started_at.map(|t| t.to_rfc3339()))
        .bind(delegation.completed_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Delegation>> {
        let row: Option<DelegationRow> =
            sqlx::query_as("SELECT * FROM delegations WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        row.map(Delegation::try_from).transpose()
    }

    async fn update(&self, delegation: &Delegation) -> DomainResult<()> {
        let result = sqlx::query(
            r"UPDATE delegations SET status = ?, result = ?, error = ?, tokens_prompt = ?,
               tokens_completion = ?, tokens_cached = ?, started_at = ?, completed_at = ?
               WHERE id = ?",
        )
        .bind(delegation.status.as_str())
        .bind(&delegation.result)
        .bind(&delegation.error)
        .bind(i64::try_from(delegation.tokens.prompt).unwrap_or(0))
        .bind(i64::try_from(delegation.tokens.completion).unwrap_or(0))
        .bind(i64::try_from(delegation.tokens.cached).unwrap_or(0))
        .bind(delegation.started_at.map(|t| t.to_rfc3339()))
        .bind(delegation.completed_at.map(|t| t.to_rfc3339()))
        .bind(delegation.id.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DomainError::not_found("delegation", delegation.id.to_string()));
        }
        Ok(())
    }

    async fn list_children(&self, parent_id: Uuid) -> DomainResult<Vec<Delegation>> {
        let rows: Vec<DelegationRow> = sqlx::query_as(
            "SELECT * FROM delegations WHERE parent_id = ? ORDER BY created_at",
        )
        .bind(parent_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Delegation::try_from).collect()
    }

    async fn tree_token_usage(&self, root_id: Uuid) -> DomainResult<TokenUsage> {
        // Recursive walk of the delegation tree in one query
        let row: Option<(i64, i64, i64)> = sqlx::query_as(
            r"WITH RECURSIVE tree(id) AS (
                SELECT id FROM delegations WHERE id = ?
                UNION ALL
                SELECT d.id FROM delegations d JOIN tree ON d.parent_id = tree.id
              )
              SELECT COALESCE(SUM(d.tokens_prompt), 0),
                     COALESCE(SUM(d.tokens_completion), 0),
                     COALESCE(SUM(d.tokens_cached), 0)
              FROM delegations d JOIN tree ON d.id = tree.id",
        )
        .bind(root_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        let (prompt, completion, cached) = row.unwrap_or((0, 0, 0));
        Ok(TokenUsage {
            prompt: u64::try_from(prompt).unwrap_or(0),
            completion: u64::try_from(completion).unwrap_or(0),
            cached: u64::try_from(cached).unwrap_or(0),
        })
    }

    async fn append_message(&self, message: &DelegationMessage) -> DomainResult<()> {
        sqlx::query(
            r"INSERT INTO delegation_messages (id, delegation_id, seq, role, content,
               tool_calls, tool_result, token_count)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(message.id.to_string())
        .bind(message.delegation_id.to_string())
        .bind(i64::from(message.seq))
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(message.tool_calls.as_ref().map(serde_json::to_string).transpose()?)
        .bind(message.tool_result.as_ref().map(serde_json::to_string).transpose()?)
        .bind(i64::try_from(message.token_count).unwrap_or(0))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_messages(&self, delegation_id: Uuid) -> DomainResult<Vec<DelegationMessage>> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT * FROM delegation_messages WHERE delegation_id = ? ORDER BY seq",
        )
        .bind(delegation_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(DelegationMessage::try_from).collect()
    }
}
