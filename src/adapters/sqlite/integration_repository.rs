//! SQLite implementation of the IntegrationRepository.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    IntegrationConfigRecord, IntegrationMessage, IntegrationStatus, MessageDirection,
};
use crate::domain::ports::IntegrationRepository;

use super::task_repository::{parse_timestamp, parse_uuid};

#[derive(Clone)]
pub struct SqliteIntegrationRepository {
    pool: SqlitePool,
}

impl SqliteIntegrationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct IntegrationRow {
    id: String,
    platform: String,
    display_name: String,
    enabled: i64,
    status: String,
    config: String,
    message_count: i64,
    connected_at: Option<String>,
    last_message_at: Option<String>,
    error_message: Option<String>,
    created_at: String,
}

impl TryFrom<IntegrationRow> for IntegrationConfigRecord {
    type Error = DomainError;

    fn try_from(row: IntegrationRow) -> Result<Self, Self::Error> {
        Ok(IntegrationConfigRecord {
            id: parse_uuid(&row.id)?,
            platform: row.platform,
            display_name: row.display_name,
            enabled: row.enabled != 0,
            status: IntegrationStatus::parse_str(&row.status)
                .ok_or_else(|| DomainError::Storage(format!("bad status '{}'", row.status)))?,
            config: serde_json::from_str(&row.config)?,
            message_count: u64::try_from(row.message_count).unwrap_or(0),
            connected_at: row.connected_at.as_deref().map(parse_timestamp).transpose()?,
            last_message_at: row
                .last_message_at
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
            error_message: row.error_message,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct IntegrationMessageRow {
    id: String,
    integration_id: String,
    direction: String,
    chat_id: String,
    text: String,
    platform_message_id: String,
    created_at: String,
}

impl TryFrom<IntegrationMessageRow> for IntegrationMessage {
    type Error = DomainError;

    fn try_from(row: IntegrationMessageRow) -> Result<Self, Self::Error> {
        Ok(IntegrationMessage {
            id: parse_uuid(&row.id)?,
            integration_id: parse_uuid(&row.integration_id)?,
            direction: MessageDirection::parse_str(&row.direction)
                .ok_or_else(|| DomainError::Storage(format!("bad direction '{}'", row.direction)))?,
            chat_id: row.chat_id,
            text: row.text,
            platform_message_id: row.platform_message_id,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}

#[async_trait]
impl IntegrationRepository for SqliteIntegrationRepository {
    async fn create(&self, record: &IntegrationConfigRecord) -> DomainResult<()> {
        sqlx::query(
            r"INSERT INTO integrations (id, platform, display_name, enabled, status, config,
               message_count, connected_at, last_message_at, error_message, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(&record.platform)
        .bind(&record.display_name)
        .bind(i64::from(record.enabled))
        .bind(record.status.as_str())
        .bind(serde_json::to_string(&record.config)?)
        .bind(i64::try_from(record.message_count).unwrap_or(0))
        .bind(record.connected_at.map(|t| t.to_rfc3339()))
        .bind(record.last_message_at.map(|t| t.to_rfc3339()))
        .bind(&record.error_message)
        .bind(record.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<IntegrationConfigRecord>> {
        let row: Option<IntegrationRow> =
            sqlx::query_as("SELECT * FROM integrations WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        row.map(IntegrationConfigRecord::try_from).transpose()
    }

    async fn update(&self, record: &IntegrationConfigRecord) -> DomainResult<()> {
        let result = sqlx::query(
            r"UPDATE integrations SET platform = ?, display_name = ?, enabled = ?, status = ?,
               config = ?, message_count = ?, connected_at = ?, last_message_at = ?,
               error_message = ? WHERE id = ?",
        )
        .bind(&record.platform)
        .bind(&record.display_name)
        .bind(i64::from(record.enabled))
        .bind(record.status.as_str())
        .bind(serde_json::to_string(&record.config)?)
        .bind(i64::try_from(record.message_count).unwrap_or(0))
        .bind(record.connected_at.map(|t| t.to_rfc3339()))
        .bind(record.last_message_at.map(|t| t.to_rfc3339()))
        .bind(&record.error_message)
        .bind(record.id.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DomainError::not_found("integration", record.id.to_string()));
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> DomainResult<()> {
        let result = sqlx::query("DELETE FROM integrations WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DomainError::not_found("integration", id.to_string()));
        }
        Ok(())
    }

    async fn list(&self) -> DomainResult<Vec<IntegrationConfigRecord>> {
        let rows: Vec<IntegrationRow> =
            sqlx::query_as("SELECT * FROM integrations ORDER BY display_name")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter()
            .map(IntegrationConfigRecord::try_from)
            .collect()
    }

    async fn list_enabled(&self) -> DomainResult<Vec<IntegrationConfigRecord>> {
        let rows: Vec<IntegrationRow> = sqlx::query_as(
            "SELECT * FROM integrations WHERE enabled = 1 ORDER BY display_name",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(IntegrationConfigRecord::try_from)
            .collect()
    }

    async fn append_message(&self, message: &IntegrationMessage) -> DomainResult<()> {
        sqlx::query(
            r"INSERT INTO integration_messages (id, integration_id, direction, chat_id,
               text, platform_message_id, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(message.id.to_string())
        .bind(message.integration_id.to_string())
        .bind(message.direction.as_str())
        .bind(&message.chat_id)
        .bind(&message.text)
        .bind(&message.platform_message_id)
        .bind(message.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_messages(
        &self,
        integration_id: Uuid,
        limit: u32,
    ) -> DomainResult<Vec<IntegrationMessage>> {
        let rows: Vec<IntegrationMessageRow> = sqlx::query_as(
            r"SELECT * FROM integration_messages WHERE integration_id = ?
               ORDER BY created_at DESC LIMIT ?",
        )
        .bind(integration_id.to_string())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(IntegrationMessage::try_from).collect()
    }
}
