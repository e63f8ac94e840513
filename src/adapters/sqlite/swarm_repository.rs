//! SQLite implementation of the SwarmRepository.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    SwarmMember, SwarmMemberStatus, SwarmRole, SwarmRun, SwarmRunStatus, SwarmStrategy,
    SwarmTemplate,
};
use crate::domain::ports::SwarmRepository;

use super::task_repository::{parse_timestamp, parse_uuid};

#[derive(Clone)]
pub struct SqliteSwarmRepository {
    pool: SqlitePool,
}

impl SqliteSwarmRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct TemplateRow {
    id: String,
    name: String,
    description: Option<String>,
    strategy: String,
    roles: String,
    coordinator_profile: Option<String>,
    is_builtin: i64,
    created_at: String,
}

impl TryFrom<TemplateRow> for SwarmTemplate {
    type Error = DomainError;

    fn try_from(row: TemplateRow) -> Result<Self, Self::Error> {
        let roles: Vec<SwarmRole> = serde_json::from_str(&row.roles)?;
        Ok(SwarmTemplate {
            id: parse_uuid(&row.id)?,
            name: row.name,
            description: row.description,
            strategy: SwarmStrategy::parse_str(&row.strategy)
                .ok_or_else(|| DomainError::Storage(format!("bad strategy '{}'", row.strategy)))?,
            roles,
            coordinator_profile: row.coordinator_profile,
            is_builtin: row.is_builtin != 0,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RunRow {
    id: String,
    template_id: String,
    task: String,
    context: Option<String>,
    strategy: String,
    status: String,
    result: Option<String>,
    error: Option<String>,
    token_budget: i64,
    tokens_in: i64,
    tokens_out: i64,
    initiator: String,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
}

impl TryFrom<RunRow> for SwarmRun {
    type Error = DomainError;

    fn try_from(row: RunRow) -> Result<Self, Self::Error> {
        Ok(SwarmRun {
            id: parse_uuid(&row.id)?,
            template_id: parse_uuid(&row.template_id)?,
            task: row.task,
            context: row.context,
            strategy: SwarmStrategy::parse_str(&row.strategy)
                .ok_or_else(|| DomainError::Storage(format!("bad strategy '{}'", row.strategy)))?,
            status: SwarmRunStatus::parse_str(&row.status)
                .ok_or_else(|| DomainError::Storage(format!("bad status '{}'", row.status)))?,
            result: row.result,
            error: row.error,
            token_budget: u64::try_from(row.token_budget).unwrap_or(0),
            tokens_in: u64::try_from(row.tokens_in).unwrap_or(0),
            tokens_out: u64::try_from(row.tokens_out).unwrap_or(0),
            initiator: row.initiator,
            created_at: parse_timestamp(&row.created_at)?,
            started_at: row.started_at.as_deref().map(parse_timestamp).transpose()?,
            completed_at: row.completed_at.as_deref().map(parse_timestamp).transpose()?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MemberRow {
    id: String,
    run_id: String,
    seq_order: i64,
    role: String,
    profile_name: String,
    status: String,
    result: Option<String>,
    delegation_id: Option<String>,
    started_at: Option<String>,
    completed_at: Option<String>,
}

impl TryFrom<MemberRow> for SwarmMember {
    type Error = DomainError;

    fn try_from(row: MemberRow) -> Result<Self, Self::Error> {
        Ok(SwarmMember {
            id: parse_uuid(&row.id)?,
            run_id: parse_uuid(&row.run_id)?,
            seq_order: u32::try_from(row.seq_order).unwrap_or(0),
            role: row.role,
            profile_name: row.profile_name,
            status: SwarmMemberStatus::parse_str(&row.status)
                .ok_or_else(|| DomainError::Storage(format!("bad status '{}'", row.status)))?,
            result: row.result,
            delegation_id: row.delegation_id.as_deref().map(parse_uuid).transpose()?,
            started_at: row.started_at.as_deref().map(parse_timestamp).transpose()?,
            completed_at: row.completed_at.as_deref().map(parse_timestamp).transpose()?,
        })
    }
}

#[async_trait]
impl SwarmRepository for SqliteSwarmRepository {
    async fn create_template(&self, template: &SwarmTemplate) -> DomainResult<()> {
        sqlx::query(
            r"INSERT INTO swarm_templates (id, name, description, strategy, roles,
               coordinator_profile, is_builtin, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(template.id.to_string())
        .bind(&template.name)
        .bind(&template.description)
        .bind(template.strategy.as_str())
        .bind(serde_json::to_string(&template.roles)?)
        .bind(&template.coordinator_profile)
        .bind(i64::from(template.is_builtin))
        .bind(template.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_template(&self, id: Uuid) -> DomainResult<Option<SwarmTemplate>> {
        let row: Option<TemplateRow> =
            sqlx::query_as("SELECT * FROM swarm_templates WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        row.map(SwarmTemplate::try_from).transpose()
    }

    async fn get_template_by_name(&self, name: &str) -> DomainResult<Option<SwarmTemplate>> {
        let row: Option<TemplateRow> =
            sqlx::query_as("SELECT * FROM swarm_templates WHERE name = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        row.map(SwarmTemplate::try_from).transpose()
    }

    async fn list_templates(&self) -> DomainResult<Vec<SwarmTemplate>> {
        let rows: Vec<TemplateRow> =
            sqlx::query_as("SELECT * FROM swarm_templates ORDER BY name")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(SwarmTemplate::try_from).collect()
    }

    async fn delete_template(&self, id: Uuid) -> DomainResult<()> {
        let result = sqlx::query("DELETE FROM swarm_templates WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DomainError::not_found("swarm template", id.to_string()));
        }
        Ok(())
    }

    async fn create_run(&self, run: &SwarmRun) -> DomainResult<()> {
        sqlx::query(
            r"INSERT INTO swarm_runs (id, template_id, task, context, strategy, status,
               result, error, token_budget, tokens_in, tokens_out, initiator,
               created_at, started_at, completed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(run.id.to_string())
        .bind(run.template_id.to_string())
        .bind(&run.task)
        .bind(&run.context)
        .bind(run.strategy.as_str())
        .bind(run.status.as_str())
        .bind(&run.result)
        .bind(&run.error)
        .bind(i64::try_from(run.token_budget).unwrap_or(i64::MAX))
        .bind(i64::try_from(run.tokens_in).unwrap_or(0))
        .bind(i64::try_from(run.tokens_out).unwrap_or(0))
        .bind(&run.initiator)
        .bind(run.created_at.to_rfc3339())
        .bind(run.started_at.map(|t| t.to_rfc3339()))
        .bind(run.completed_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_run(&self, id: Uuid) -> DomainResult<Option<SwarmRun>> {
        let row: Option<RunRow> = sqlx::query_as("SELECT * FROM swarm_runs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(SwarmRun::try_from).transpose()
    }

    async fn update_run(&self, run: &SwarmRun) -> DomainResult<()> {
        let result = sqlx::query(
            r"UPDATE swarm_runs SET status = ?, result = ?, error = ?, tokens_in = ?,
               tokens_out = ?, started_at = ?, completed_at = ? WHERE id = ?",
        )
        .bind(run.status.as_str())
        .bind(&run.result)
        .bind(&run.error)
        .bind(i64::try_from(run.tokens_in).unwrap_or(0))
        .bind(i64::try_from(run.tokens_out).unwrap_or(0))
        .bind(run.started_at.map(|t| t.to_rfc3339()))
        .bind(run.completed_at.map(|t| t.to_rfc3339()))
        .bind(run.id.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DomainError::not_found("swarm run", run.id.to_string()));
        }
        Ok(())
    }

    async fn list_runs(&self, limit: u32, offset: u32) -> DomainResult<Vec<SwarmRun>> {
        let rows: Vec<RunRow> = sqlx::query_as(
            "SELECT * FROM swarm_runs ORDER BY created_at DESC LIMIT ? OFFSET ?",
        )
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(SwarmRun::try_from).collect()
    }

    async fn create_member(&self, member: &SwarmMember) -> DomainResult<()> {
        sqlx::query(
            r"INSERT INTO swarm_members (id, run_id, seq_order, role, profile_name,
               status, result, delegation_id, started_at, completed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(member.id.to_string())
        .bind(member.run_id.to_string())
        .bind(i64::from(member.seq_order))
        .bind(&member.role)
        .bind(&member.profile_name)
        .bind(member.status.as_str())
        .bind(&member.result)
        .bind(member.delegation_id.map(|id| id.to_string()))
        .bind(member.started_at.map(|t| t.to_rfc3339()))
        .bind(member.completed_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_member(&self, member: &SwarmMember) -> DomainResult<()> {
        let result = sqlx::query(
            r"UPDATE swarm_members SET status = ?, result = ?, delegation_id = ?,
               started_at = ?, completed_at = ? WHERE id = ?",
        )
        .bind(member.status.as_str())
        .bind(&member.result)
        .bind(member.delegation_id.map(|id| id.to_string()))
        .bind(member.started_at.map(|t| t.to_rfc3339()))
        .bind(member.completed_at.map(|t| t.to_rfc3339()))
        .bind(member.id.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DomainError::not_found("swarm member", member.id.to_string()));
        }
        Ok(())
    }

    async fn list_members(&self, run_id: Uuid) -> DomainResult<Vec<SwarmMember>> {
        let rows: Vec<MemberRow> = sqlx::query_as(
            "SELECT * FROM swarm_members WHERE run_id = ? ORDER BY seq_order",
        )
        .bind(run_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(SwarmMember::try_from).collect()
    }
}
