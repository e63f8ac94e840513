//! Database connection pool manager.
//!
//! SQLite with WAL mode for concurrent readers, a bounded pool, and an
//! idempotent schema bootstrap run at connect time. Parameterised queries
//! only; every repository binds, never interpolates.

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::str::FromStr;
use std::time::Duration;

use crate::domain::errors::{DomainError, DomainResult};

/// Schema bootstrap statements, executed in order.
const SCHEMA: &[&str] = &[
    r"CREATE TABLE IF NOT EXISTS tasks (
        id TEXT PRIMARY KEY,
        correlation_id TEXT,
        parent_id TEXT,
        task_type TEXT NOT NULL,
        name TEXT NOT NULL,
        description TEXT,
        input_hash TEXT NOT NULL,
        status TEXT NOT NULL,
        timeout_ms INTEGER NOT NULL,
        security TEXT NOT NULL,
        outcome TEXT,
        resources TEXT,
        created_at TEXT NOT NULL,
        started_at TEXT,
        completed_at TEXT,
        duration_ms INTEGER
    )",
    "CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status)",
    "CREATE INDEX IF NOT EXISTS idx_tasks_created_at ON tasks(created_at)",
    r"CREATE TABLE IF NOT EXISTS swarm_templates (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        description TEXT,
        strategy TEXT NOT NULL,
        roles TEXT NOT NULL,
        coordinator_profile TEXT,
        is_builtin INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    )",
    r"CREATE TABLE IF NOT EXISTS swarm_runs (
        id TEXT PRIMARY KEY,
        template_id TEXT NOT NULL,
        task TEXT NOT NULL,
        context TEXT,
        strategy TEXT NOT NULL,
        status TEXT NOT NULL,
        result TEXT,
        error TEXT,
        token_budget INTEGER NOT NULL,
        tokens_in INTEGER NOT NULL DEFAULT 0,
        tokens_out INTEGER NOT NULL DEFAULT 0,
        initiator TEXT NOT NULL,
        created_at TEXT NOT NULL,
        started_at TEXT,
        completed_at TEXT
    )",
    r"CREATE TABLE IF NOT EXISTS swarm_members (
        id TEXT PRIMARY KEY,
        run_id TEXT NOT NULL,
        seq_order INTEGER NOT NULL,
        role TEXT NOT NULL,
        profile_name TEXT NOT NULL,
        status TEXT NOT NULL,
        result TEXT,
        delegation_id TEXT,
        started_at TEXT,
        completed_at TEXT,
        UNIQUE(run_id, seq_order)
    )",
    r"CREATE TABLE IF NOT EXISTS delegations (
        id TEXT PRIMARY KEY,
        profile_id TEXT NOT NULL,
        profile_name TEXT NOT NULL,
        parent_id TEXT,
        task TEXT NOT NULL,
        context TEXT,
        depth INTEGER NOT NULL,
        max_depth INTEGER NOT NULL,
        token_budget INTEGER NOT NULL,
        timeout_ms INTEGER NOT NULL,
        model TEXT NOT NULL,
        status TEXT NOT NULL,
        result TEXT,
        error TEXT,
        tokens_prompt INTEGER NOT NULL DEFAULT 0,
        tokens_completion INTEGER NOT NULL DEFAULT 0,
        tokens_cached INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        started_at TEXT,
        completed_at TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_delegations_parent ON delegations(parent_id)",
    r"CREATE TABLE IF NOT EXISTS delegation_messages (
        id TEXT PRIMARY KEY,
        delegation_id TEXT NOT NULL,
        seq INTEGER NOT NULL,
        role TEXT NOT NULL,
        content TEXT NOT NULL,
        tool_calls TEXT,
        tool_result TEXT,
        token_count INTEGER NOT NULL DEFAULT 0,
        UNIQUE(delegation_id, seq)
    )",
    r"CREATE TABLE IF NOT EXISTS agent_profiles (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        system_prompt TEXT NOT NULL,
        max_token_budget INTEGER NOT NULL,
        allowed_tools TEXT NOT NULL,
        default_model TEXT NOT NULL,
        kind TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    r"CREATE TABLE IF NOT EXISTS integrations (
        id TEXT PRIMARY KEY,
        platform TEXT NOT NULL,
        display_name TEXT NOT NULL,
        enabled INTEGER NOT NULL DEFAULT 1,
        status TEXT NOT NULL,
        config TEXT NOT NULL,
        message_count INTEGER NOT NULL DEFAULT 0,
        connected_at TEXT,
        last_message_at TEXT,
        error_message TEXT,
        created_at TEXT NOT NULL
    )",
    r"CREATE TABLE IF NOT EXISTS integration_messages (
        id TEXT PRIMARY KEY,
        integration_id TEXT NOT NULL,
        direction TEXT NOT NULL,
        chat_id TEXT NOT NULL,
        text TEXT NOT NULL,
        platform_message_id TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_integration_messages ON integration_messages(integration_id, created_at)",
    r"CREATE TABLE IF NOT EXISTS audit_log (
        seq INTEGER PRIMARY KEY,
        timestamp TEXT NOT NULL,
        level TEXT NOT NULL,
        event TEXT NOT NULL,
        message TEXT NOT NULL,
        user_id TEXT,
        task_id TEXT,
        correlation_id TEXT,
        metadata TEXT NOT NULL,
        prev_hash TEXT NOT NULL,
        hash TEXT NOT NULL,
        signature TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_audit_event ON audit_log(event)",
    "CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp)",
];

/// Connection pool with SQLite pragmas tuned for a single local process.
pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    /// Open (creating if missing), configure WAL, and bootstrap the
    /// schema.
    pub async fn new(database_url: &str, max_connections: u32) -> DomainResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| DomainError::Storage(format!("invalid database URL: {e}")))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(|e| DomainError::Storage(format!("failed to create pool: {e}")))?;

        let connection = Self { pool };
        connection.bootstrap().await?;
        Ok(connection)
    }

    /// In-memory database for tests.
    pub async fn in_memory() -> DomainResult<Self> {
        Self::new("sqlite::memory:", 1).await
    }

    pub fn pool(&self) -> SqlitePool {
        self.pool.clone()
    }

    async fn bootstrap(&self) -> DomainResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bootstrap_is_idempotent() {
        let connection = DatabaseConnection::in_memory().await.unwrap();
        // A second pass over the schema must be a no-op
        connection.bootstrap().await.unwrap();

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
        )
        .fetch_all(&connection.pool())
        .await
        .unwrap();
        let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
        for expected in [
            "tasks",
            "swarm_templates",
            "swarm_runs",
            "swarm_members",
            "delegations",
            "delegation_messages",
            "agent_profiles",
            "integrations",
            "integration_messages",
            "audit_log",
        ] {
            assert!(names.contains(&expected), "missing table {expected}");
        }
    }
}
