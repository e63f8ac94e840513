//! SQLite implementation of the TaskRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    ResourceUsage, SecurityContext, Task, TaskOutcome, TaskStatus, TaskType,
};
use crate::domain::ports::{TaskFilter, TaskPage, TaskRepository};

#[derive(Clone)]
pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    correlation_id: Option<String>,
    parent_id: Option<String>,
    task_type: String,
    name: String,
    description: Option<String>,
    input_hash: String,
    status: String,
    timeout_ms: i64,
    security: String,
    outcome: Option<String>,
    resources: Option<String>,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    duration_ms: Option<i64>,
}

impl TryFrom<TaskRow> for Task {
    type Error = DomainError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let security: SecurityContext = serde_json::from_str(&row.security)?;
        let outcome: Option<TaskOutcome> = row
            .outcome
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        let resources: Option<ResourceUsage> = row
            .resources
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        Ok(Task {
            id: parse_uuid(&row.id)?,
            correlation_id: row.correlation_id.as_deref().map(parse_uuid).transpose()?,
            parent_id: row.parent_id.as_deref().map(parse_uuid).transpose()?,
            task_type: TaskType::parse_str(&row.task_type)
                .ok_or_else(|| DomainError::Storage(format!("bad task_type '{}'", row.task_type)))?,
            name: row.name,
            description: row.description,
            input_hash: row.input_hash,
            status: TaskStatus::parse_str(&row.status)
                .ok_or_else(|| DomainError::Storage(format!("bad status '{}'", row.status)))?,
            timeout_ms: u64::try_from(row.timeout_ms).unwrap_or(0),
            security,
            outcome,
            resources,
            created_at: parse_timestamp(&row.created_at)?,
            started_at: row.started_at.as_deref().map(parse_timestamp).transpose()?,
            completed_at: row.completed_at.as_deref().map(parse_timestamp).transpose()?,
            duration_ms: row.duration_ms.map(|d| u64::try_from(d).unwrap_or(0)),
        })
    }
}

pub(crate) fn parse_uuid(s: &str) -> DomainResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| DomainError::Storage(format!("bad uuid '{s}': {e}")))
}

pub(crate) fn parse_timestamp(s: &str) -> DomainResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DomainError::Storage(format!("bad timestamp '{s}': {e}")))
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    async fn create(&self, task: &Task) -> DomainResult<()> {
        sqlx::query(
            r"INSERT INTO tasks (id, correlation_id, parent_id, task_type, name, description,
               input_hash, status, timeout_ms, security, outcome, resources,
               created_at, started_at, completed_at, duration_ms)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(task.id.to_string())
        .bind(task.correlation_id.map(|id| id.to_string()))
        .bind(task.parent_id.map(|id| id.to_string()))
        .bind(task.task_type.as_str())
        .bind(&task.name)
        .bind(&task.description)
        .bind(&task.input_hash)
        .bind(task.status.as_str())
        .bind(i64::try_from(task.timeout_ms).unwrap_or(i64::MAX))
        .bind(serde_json::to_string(&task.security)?)
        .bind(task.outcome.as_ref().map(serde_json::to_string).transpose()?)
        .bind(task.resources.as_ref().map(serde_json::to_string).transpose()?)
        .bind(task.created_at.to_rfc3339())
        .bind(task.started_at.map(|t| t.to_rfc3339()))
        .bind(task.completed_at.map(|t| t.to_rfc3339()))
        .bind(task.duration_ms.map(|d| i64::try_from(d).unwrap_or(i64::MAX)))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Task>> {
        let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM tasks WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Task::try_from).transpose()
    }

    async fn update(&self, task: &Task) -> DomainResult<()> {
        let result = sqlx::query(
            r"UPDATE tasks SET status = ?, outcome = ?, resources = ?, name = ?,
               description = ?, task_type = ?, started_at = ?, completed_at = ?, duration_ms = ?
               WHERE id = ?",
        )
        .bind(task.status.as_str())
        .bind(task.outcome.as_ref().map(serde_json::to_string).transpose()?)
        .bind(task.resources.as_ref().map(serde_json::to_string).transpose()?)
        .bind(&task.name)
        .bind(&task.description)
        .bind(task.task_type.as_str())
        .bind(task.started_at.map(|t| t.to_rfc3339()))
        .bind(task.completed_at.map(|t| t.to_rfc3339()))
        .bind(task.duration_ms.map(|d| i64::try_from(d).unwrap_or(i64::MAX)))
        .bind(task.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::not_found("task", task.id.to_string()));
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> DomainResult<()> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DomainError::not_found("task", id.to_string()));
        }
        Ok(())
    }

    async fn list(&self, filter: TaskFilter) -> DomainResult<TaskPage> {
        let mut where_clause = String::from(" WHERE 1=1");
        let mut bindings: Vec<String> = Vec::new();

        if let Some(status) = &filter.status {
            where_clause.push_str(" AND status = ?");
            bindings.push(status.as_str().to_string());
        }
        if let Some(task_type) = &filter.task_type {
            where_clause.push_str(" AND task_type = ?");
            bindings.push(task_type.as_str().to_string());
        }
        if let Some(user_id) = &filter.user_id {
            where_clause.push_str(" AND json_extract(security, '$.user_id') = ?");
            bindings.push(user_id.clone());
        }
        if let Some(from) = &filter.from {
            where_clause.push_str(" AND created_at >= ?");
            bindings.push(from.to_rfc3339());
        }
        if let Some(to) = &filter.to {
            where_clause.push_str(" AND created_at <= ?");
            bindings.push(to.to_rfc3339());
        }

        let count_sql = format!("SELECT COUNT(*) FROM tasks{where_clause}");
        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
        for binding in &bindings {
            count_query = count_query.bind(binding);
        }
        let total = count_query.fetch_one(&self.pool).await?;

        let limit = filter.limit.unwrap_or(50);
        let offset = filter.offset.unwrap_or(0);
        let select_sql = format!(
            "SELECT * FROM tasks{where_clause} ORDER BY created_at DESC LIMIT ? OFFSET ?"
        );
        let mut select_query = sqlx::query_as::<_, TaskRow>(&select_sql);
        for binding in &bindings {
            select_query = select_query.bind(binding);
        }
        let rows = select_query
            .bind(i64::from(limit))
            .bind(i64::from(offset))
            .fetch_all(&self.pool)
            .await?;

        let tasks = rows
            .into_iter()
            .map(Task::try_from)
            .collect::<DomainResult<Vec<Task>>>()?;

        Ok(TaskPage {
            tasks,
            total: u64::try_from(total).unwrap_or(0),
        })
    }

    async fn count_by_status(&self, status: TaskStatus) -> DomainResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}
