//! SQLite implementation of the AuditStore.
//!
//! Timestamps are stored in the chain's canonical millisecond form so the
//! hash input survives persistence cycles byte-for-byte.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{AuditEntry, AuditEvent, AuditFilter, AuditLevel, AuditStats};
use crate::domain::ports::AuditStore;

use super::task_repository::parse_timestamp;

/// Upper bound on rows returned by an unbounded query.
const MAX_QUERY_ROWS: u32 = 1_000;

#[derive(Clone)]
pub struct SqliteAuditStore {
    pool: SqlitePool,
}

impl SqliteAuditStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct AuditRow {
    seq: i64,
    timestamp: String,
    level: String,
    event: String,
    message: String,
    user_id: Option<String>,
    task_id: Option<String>,
    correlation_id: Option<String>,
    metadata: String,
    prev_hash: String,
    hash: String,
    signature: String,
}

impl TryFrom<AuditRow> for AuditEntry {
    type Error = DomainError;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        Ok(AuditEntry {
            seq: u64::try_from(row.seq).unwrap_or(0),
            timestamp: parse_timestamp(&row.timestamp)?,
            level: AuditLevel::parse_str(&row.level)
                .ok_or_else(|| DomainError::Storage(format!("bad level '{}'", row.level)))?,
            event: AuditEvent::parse_str(&row.event)
                .ok_or_else(|| DomainError::Storage(format!("bad event '{}'", row.event)))?,
            message: row.message,
            user_id: row.user_id,
            task_id: row.task_id,
            correlation_id: row.correlation_id,
            metadata: serde_json::from_str(&row.metadata)?,
            prev_hash: row.prev_hash,
            hash: row.hash,
            signature: row.signature,
        })
    }
}

#[async_trait]
impl AuditStore for SqliteAuditStore {
    async fn append(&self, entry: &AuditEntry) -> DomainResult<()> {
        sqlx::query(
            r"INSERT INTO audit_log (seq, timestamp, level, event, message, user_id,
               task_id, correlation_id, metadata, prev_hash, hash, signature)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(i64::try_from(entry.seq).map_err(|_| {
            DomainError::Storage(format!("sequence {} out of range", entry.seq))
        })?)
        .bind(AuditEntry::canonical_timestamp(&entry.timestamp))
        .bind(entry.level.as_str())
        .bind(entry.event.as_str())
        .bind(&entry.message)
        .bind(&entry.user_id)
        .bind(&entry.task_id)
        .bind(&entry.correlation_id)
        .bind(serde_json::to_string(&entry.metadata)?)
        .bind(&entry.prev_hash)
        .bind(&entry.hash)
        .bind(&entry.signature)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn last(&self) -> DomainResult<Option<AuditEntry>> {
        let row: Option<AuditRow> =
            sqlx::query_as("SELECT * FROM audit_log ORDER BY seq DESC LIMIT 1")
                .fetch_optional(&self.pool)
                .await?;
        row.map(AuditEntry::try_from).transpose()
    }

    async fn query(&self, filter: AuditFilter) -> DomainResult<Vec<AuditEntry>> {
        let mut where_clause = String::from(" WHERE 1=1");
        let mut bindings: Vec<String> = Vec::new();

        if let Some(event) = &filter.event {
            where_clause.push_str(" AND event = ?");
            bindings.push(event.as_str().to_string());
        }
        if let Some(user_id) = &filter.user_id {
            where_clause.push_str(" AND user_id = ?");
            bindings.push(user_id.clone());
        }
        if let Some(task_id) = &filter.task_id {
            where_clause.push_str(" AND task_id = ?");
            bindings.push(task_id.clone());
        }
        if let Some(from) = &filter.from {
            where_clause.push_str(" AND timestamp >= ?");
            bindings.push(AuditEntry::canonical_timestamp(from));
        }
        if let Some(to) = &filter.to {
            where_clause.push_str(" AND timestamp <= ?");
            bindings.push(AuditEntry::canonical_timestamp(to));
        }

        let order = if filter.ascending { "ASC" } else { "DESC" };
        let sql = format!("SELECT * FROM audit_log{where_clause} ORDER BY seq {order}");
        let mut query = sqlx::query_as::<_, AuditRow>(&sql);
        for binding in &bindings {
            query = query.bind(binding);
        }
        let rows = query.fetch_all(&self.pool).await?;

        // Level threshold is ordinal, filtered here rather than in SQL
        let mut entries: Vec<AuditEntry> = rows
            .into_iter()
            .map(AuditEntry::try_from)
            .collect::<DomainResult<Vec<_>>>()?
            .into_iter()
            .filter(|e| filter.min_level.is_none_or(|l| e.level >= l))
            .collect();

        let offset = filter.offset.unwrap_or(0) as usize;
        let limit = filter.limit.unwrap_or(MAX_QUERY_ROWS) as usize;
        if offset > 0 {
            entries.drain(..offset.min(entries.len()));
        }
        entries.truncate(limit);
        Ok(entries)
    }

    async fn range(&self, from_seq: u64, to_seq: u64) -> DomainResult<Vec<AuditEntry>> {
        let rows: Vec<AuditRow> = sqlx::query_as(
            "SELECT * FROM audit_log WHERE seq >= ? AND seq <= ? ORDER BY seq ASC",
        )
        .bind(i64::try_from(from_seq).unwrap_or(i64::MAX))
        .bind(i64::try_from(to_seq).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(AuditEntry::try_from).collect()
    }

    async fn delete_before(&self, before_seq: u64) -> DomainResult<u64> {
        let result = sqlx::query("DELETE FROM audit_log WHERE seq < ?")
            .bind(i64::try_from(before_seq).unwrap_or(i64::MAX))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn first_seq(&self) -> DomainResult<Option<u64>> {
        let seq: Option<i64> = sqlx::query_scalar("SELECT MIN(seq) FROM audit_log")
            .fetch_one(&self.pool)
            .await?;
        Ok(seq.map(|s| u64::try_from(s).unwrap_or(0)))
    }

    async fn stats(&self) -> DomainResult<AuditStats> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM audit_log")
            .fetch_one(&self.pool)
            .await?;

        let by_level_rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT level, COUNT(*) FROM audit_log GROUP BY level")
                .fetch_all(&self.pool)
                .await?;
        let by_event_rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT event, COUNT(*) FROM audit_log GROUP BY event")
                .fetch_all(&self.pool)
                .await?;

        let bounds: Option<(Option<String>, Option<String>)> =
            sqlx::query_as("SELECT MIN(timestamp), MAX(timestamp) FROM audit_log")
                .fetch_optional(&self.pool)
                .await?;
        let (oldest, newest) = bounds.unwrap_or((None, None));

        Ok(AuditStats {
            total_entries: u64::try_from(total).unwrap_or(0),
            by_level: by_level_rows
                .into_iter()
                .map(|(level, count)| (level, u64::try_from(count).unwrap_or(0)))
                .collect(),
            by_event: by_event_rows
                .into_iter()
                .map(|(event, count)| (event, u64::try_from(count).unwrap_or(0)))
                .collect(),
            oldest_entry: oldest.as_deref().map(parse_timestamp).transpose()?,
            newest_entry: newest.as_deref().map(parse_timestamp).transpose()?,
        })
    }
}
