//! Audit store port.
//!
//! The store is dumb persistence; chaining, signing, and verification live
//! in the audit chain service, which is the store's only writer.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{AuditEntry, AuditFilter, AuditStats};

/// Persistence interface for sealed audit entries.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Durably append one sealed entry. Must fail (not silently drop) on
    /// any persistence error: the chain head only advances on success.
    async fn append(&self, entry: &AuditEntry) -> DomainResult<()>;

    /// The entry with the highest sequence, if any.
    async fn last(&self) -> DomainResult<Option<AuditEntry>>;

    /// Entries matching the filter.
    async fn query(&self, filter: AuditFilter) -> DomainResult<Vec<AuditEntry>>;

    /// Contiguous range `[from_seq, to_seq]`, ascending.
    async fn range(&self, from_seq: u64, to_seq: u64) -> DomainResult<Vec<AuditEntry>>;

    /// Delete every entry with `seq < before_seq`. Returns deleted count.
    /// Remaining rows are never mutated.
    async fn delete_before(&self, before_seq: u64) -> DomainResult<u64>;

    /// Lowest sequence still present, if any.
    async fn first_seq(&self) -> DomainResult<Option<u64>>;

    /// Aggregate statistics.
    async fn stats(&self) -> DomainResult<AuditStats>;
}
