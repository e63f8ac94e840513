//! SQLite implementation of the ProfileRepository.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{AgentProfile, ProfileKind};
use crate::domain::ports::ProfileRepository;

use super::task_repository::{parse_timestamp, parse_uuid};

#[derive(Clone)]
pub struct SqliteProfileRepository {
    pool: SqlitePool,
}

impl SqliteProfileRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ProfileRow {
    id: String,
    name: String,
    system_prompt: String,
    max_token_budget: i64,
    allowed_tools: String,
    default_model: String,
    kind: String,
    created_at: String,
}

impl TryFrom<ProfileRow> for AgentProfile {
    type Error = DomainError;

    fn try_from(row: ProfileRow) -> Result<Self, Self::Error> {
        Ok(AgentProfile {
            id: parse_uuid(&row.id)?,
            name: row.name,
            system_prompt: row.system_prompt,
            max_token_budget: u64::try_from(row.max_token_budget).unwrap_or(0),
            allowed_tools: serde_json::from_str(&row.allowed_tools)?,
            default_model: row.default_model,
            kind: ProfileKind::parse_str(&row.kind)
                .ok_or_else(|| DomainError::Storage(format!("bad kind '{}'", row.kind)))?,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}

#[async_trait]
impl ProfileRepository for SqliteProfileRepository {
    async fn create(&self, profile: &AgentProfile) -> DomainResult<()> {
        sqlx::query(
            r"INSERT INTO agent_profiles (id, name, system_prompt, max_token_budget,
               allowed_tools, default_model, kind, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(profile.id.to_string())
        .bind(&profile.name)
        .bind(&profile.system_prompt)
        .bind(i64::try_from(profile.max_token_budget).unwrap_or(i64::MAX))
        .bind(serde_json::to_string(&profile.allowed_tools)?)
        .bind(&profile.default_model)
        .bind(profile.kind.as_str())
        .bind(profile.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<AgentProfile>> {
        let row: Option<ProfileRow> =
            sqlx::query_as("SELECT * FROM agent_profiles WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        row.map(AgentProfile::try_from).transpose()
    }

    async fn get_by_name(&self, name: &str) -> DomainResult<Option<AgentProfile>> {
        let row: Option<ProfileRow> =
            sqlx::query_as("SELECT * FROM agent_profiles WHERE name = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        row.map(AgentProfile::try_from).transpose()
    }

    async fn list(&self) -> DomainResult<Vec<AgentProfile>> {
        let rows: Vec<ProfileRow> =
            sqlx::query_as("SELECT * FROM agent_profiles ORDER BY name")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(AgentProfile::try_from).collect()
    }

    async fn update(&self, profile: &AgentProfile) -> DomainResult<()> {
        let result = sqlx::query(
            r"UPDATE agent_profiles SET name = ?, system_prompt = ?, max_token_budget = ?,
               allowed_tools = ?, default_model = ?, kind = ? WHERE id = ?",
        )
        .bind(&profile.name)
        .bind(&profile.system_prompt)
        .bind(i64::try_from(profile.max_token_budget).unwrap_or(i64::MAX))
        .bind(serde_json::to_string(&profile.allowed_tools)?)
        .bind(&profile.default_model)
        .bind(profile.kind.as_str())
        .bind(profile.id.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DomainError::not_found("agent profile", profile.id.to_string()));
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> DomainResult<()> {
        let result = sqlx::query("DELETE FROM agent_profiles WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DomainError::not_found("agent profile", id.to_string()));
        }
        Ok(())
    }
}
