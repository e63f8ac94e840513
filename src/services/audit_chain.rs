//! Tamper-evident audit chain.
//!
//! Single append-only writer over an `AuditStore`. Every entry chains the
//! previous one (`hash = SHA-256(prev_hash || canonical)`) and carries an
//! HMAC-SHA-256 signature over its hash. The in-memory head only advances
//! after a durable append, so a persistence failure leaves the chain
//! exactly where it was and the caller's operation unacknowledged.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AuditDraft, AuditEntry, AuditFilter, AuditStats, VerifyReport,
};
use crate::domain::ports::AuditStore;

type HmacSha256 = Hmac<Sha256>;

/// Hash of "nothing": the prev_hash of the very first entry.
const GENESIS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Minimum entropy the signing key must carry.
const MIN_KEY_BYTES: usize = 32;

/// Batch size for verification and retention scans.
const SCAN_BATCH: u64 = 512;

/// SHA-256 (lowercase hex) of the canonical JSON of an arbitrary value.
/// serde_json object keys serialise sorted, so this is deterministic and
/// used for task input/output binding as well.
pub fn sha256_hex_of_value(value: &serde_json::Value) -> String {
    let canonical = serde_json::to_string(value).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Retention request. Both bounds optional; the stricter one wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetentionPolicy {
    pub max_age_days: Option<u32>,
    pub max_entries: Option<u64>,
}

/// What a retention pass did.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RetentionReport {
    pub deleted: u64,
    pub stats: AuditStats,
}

struct ChainHead {
    seq: u64,
    hash: String,
}

/// The chain service. Cheap to share behind an `Arc`.
pub struct AuditChain {
    store: Arc<dyn AuditStore>,
    signing_key: Vec<u8>,
    /// Serialises appends so hashes chain correctly.
    head: Mutex<Option<ChainHead>>,
    /// Live fanout of sealed entries, consumed by the gateway hub.
    events: broadcast::Sender<AuditEntry>,
}

impl AuditChain {
    /// Open the chain over a store, seeding the head from the last
    /// persisted entry. Rejects signing keys under 32 bytes.
    pub async fn open(store: Arc<dyn AuditStore>, signing_key: Vec<u8>) -> DomainResult<Self> {
        if signing_key.len() < MIN_KEY_BYTES {
            return Err(DomainError::Config(format!(
                "audit signing key must be at least {MIN_KEY_BYTES} bytes, got {}",
                signing_key.len()
            )));
        }

        let head = store
            .last()
            .await?
            .map(|entry| ChainHead {
                seq: entry.seq,
                hash: entry.hash,
            });

        let (events, _) = broadcast::channel(256);
        Ok(Self {
            store,
            signing_key,
            head: Mutex::new(head),
            events,
        })
    }

    /// Subscribe to sealed entries as they are appended.
    pub fn subscribe(&self) -> broadcast::Receiver<AuditEntry> {
        self.events.subscribe()
    }

    /// Append one entry. Atomic from the caller's view: sequence
    /// assignment, hashing, signing, persistence, then head advance.
    pub async fn record(&self, draft: AuditDraft) -> DomainResult<AuditEntry> {
        let mut head = self.head.lock().await;

        let (seq, prev_hash) = match head.as_ref() {
            Some(h) => (h.seq + 1, h.hash.clone()),
            None => (0, GENESIS_HASH.to_string()),
        };

        let mut entry = AuditEntry {
            seq,
            timestamp: chrono::Utc::now(),
            level: draft.level,
            event: draft.event,
            message: draft.message,
            user_id: draft.user_id,
            task_id: draft.task_id,
            correlation_id: draft.correlation_id,
            metadata: draft.metadata,
            prev_hash,
            hash: String::new(),
            signature: String::new(),
        };
        entry.hash = compute_hash(&entry);
        entry.signature = sign(&self.signing_key, &entry.hash);

        self.store
            .append(&entry)
            .await
            .map_err(|e| DomainError::AuditWrite(e.to_string()))?;

        *head = Some(ChainHead {
            seq,
            hash: entry.hash.clone(),
        });

        // Fanout is best-effort; no subscribers is the common case
        let _ = self.events.send(entry.clone());

        Ok(entry)
    }

    /// Query entries, newest-first by default.
    pub async fn query(&self, filter: AuditFilter) -> DomainResult<Vec<AuditEntry>> {
        self.store.query(filter).await
    }

    /// Bulk dump of `[from_seq, to_seq]`, ascending.
    pub async fn export(&self, from_seq: u64, to_seq: u64) -> DomainResult<Vec<AuditEntry>> {
        self.store.range(from_seq, to_seq).await
    }

    /// Aggregate statistics straight from the store.
    pub async fn stats(&self) -> DomainResult<AuditStats> {
        self.store.stats().await
    }

    /// Recompute the whole chain and report the first broken link.
    ///
    /// After retention trimming, the oldest remaining entry has no stored
    /// predecessor; its own hash and signature are still checked and it
    /// anchors the rest of the chain.
    pub async fn verify(&self) -> DomainResult<VerifyReport> {
        let Some(first_seq) = self.store.first_seq().await? else {
            return Ok(VerifyReport {
                ok: true,
                first_broken_seq: None,
                entries_checked: 0,
            });
        };
        let last_seq = match self.store.last().await? {
            Some(entry) => entry.seq,
            None => {
                return Ok(VerifyReport {
                    ok: true,
                    first_broken_seq: None,
                    entries_checked: 0,
                })
            }
        };

        let mut checked: u64 = 0;
        let mut expected_prev: Option<String> = None;
        let mut expected_seq = first_seq;
        let mut cursor = first_seq;

        while cursor <= last_seq {
            let upper = cursor.saturating_add(SCAN_BATCH - 1).min(last_seq);
            let batch = self.store.range(cursor, upper).await?;

            for entry in &batch {
                checked += 1;

                // Sequence continuity (retention only trims the prefix)
                if entry.seq != expected_seq {
                    return Ok(VerifyReport {
                        ok: false,
                        first_broken_seq: Some(entry.seq),
                        entries_checked: checked,
                    });
                }

                // Link to predecessor
                let link_ok = match &expected_prev {
                    Some(prev) => entry.prev_hash == *prev,
                    // Anchor entry: a full chain must start at genesis;
                    // a trimmed chain starts wherever retention left it.
                    None => entry.seq != 0 || entry.prev_hash == GENESIS_HASH,
                };

                let hash_ok = entry.hash == compute_hash(entry);
                let signature_ok = entry.signature == sign(&self.signing_key, &entry.hash);

                if !(link_ok && hash_ok && signature_ok) {
                    return Ok(VerifyReport {
                        ok: false,
                        first_broken_seq: Some(entry.seq),
                        entries_checked: checked,
                    });
                }

                expected_prev = Some(entry.hash.clone());
                expected_seq = entry.seq + 1;
            }

            if batch.is_empty() {
                break;
            }
            cursor = upper + 1;
        }

        Ok(VerifyReport {
            ok: true,
            first_broken_seq: None,
            entries_checked: checked,
        })
    }

    /// Delete entries from the tail (oldest) per policy. Never mutates
    /// remaining links; `verify()` still passes on the remainder.
    pub async fn enforce_retention(&self, policy: RetentionPolicy) -> DomainResult<RetentionReport> {
        let Some(first_seq) = self.store.first_seq().await? else {
            return Ok(RetentionReport {
                deleted: 0,
                stats: self.store.stats().await?,
            });
        };
        let last_seq = match self.store.last().await? {
            Some(entry) => entry.seq,
            None => {
                return Ok(RetentionReport {
                    deleted: 0,
                    stats: self.store.stats().await?,
                })
            }
        };

        // Highest sequence that must be deleted, per each bound.
        let mut delete_below = first_seq; // nothing by default

        if let Some(max_entries) = policy.max_entries {
            let total = last_seq - first_seq + 1;
            if total > max_entries {
                delete_below = delete_below.max(last_seq - max_entries + 1);
            }
        }

        if let Some(max_age_days) = policy.max_age_days {
            let cutoff = chrono::Utc::now() - chrono::Duration::days(i64::from(max_age_days));
            let mut cursor = first_seq;
            'scan: while cursor <= last_seq {
                let upper = cursor.saturating_add(SCAN_BATCH - 1).min(last_seq);
                let batch = self.store.range(cursor, upper).await?;
                if batch.is_empty() {
                    break;
                }
                for entry in &batch {
                    if entry.timestamp >= cutoff {
                        break 'scan;
                    }
                    delete_below = delete_below.max(entry.seq + 1);
                }
                cursor = upper + 1;
            }
        }

        // The head entry always survives so the chain stays anchored.
        delete_below = delete_below.min(last_seq);

        let deleted = if delete_below > first_seq {
            self.store.delete_before(delete_below).await?
        } else {
            0
        };

        Ok(RetentionReport {
            deleted,
            stats: self.store.stats().await?,
        })
    }
}

/// `hash = SHA-256(prev_hash || canonical(entry_without_hash))`, hex.
fn compute_hash(entry: &AuditEntry) -> String {
    let mut hasher = Sha256::new();
    hasher.update(entry.prev_hash.as_bytes());
    hasher.update(entry.canonical_json().as_bytes());
    hex::encode(hasher.finalize())
}

/// `signature = HMAC-SHA-256(signing_key, hash)`, hex.
fn sign(key: &[u8], hash: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key size");
    mac.update(hash.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{AuditEvent, AuditLevel};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::RwLock;

    /// In-memory store used by unit tests; the SQLite adapter has its own.
    #[derive(Default)]
    struct MemStore {
        entries: RwLock<Vec<AuditEntry>>,
        fail_appends: AtomicBool,
    }

    #[async_trait]
    impl AuditStore for MemStore {
        async fn append(&self, entry: &AuditEntry) -> DomainResult<()> {
            if self.fail_appends.load(Ordering::SeqCst) {
                return Err(DomainError::Storage("disk full".into()));
            }
            self.entries.write().await.push(entry.clone());
            Ok(())
        }

        async fn last(&self) -> DomainResult<Option<AuditEntry>> {
            Ok(self.entries.read().await.last().cloned())
        }

        async fn query(&self, filter: AuditFilter) -> DomainResult<Vec<AuditEntry>> {
            let entries = self.entries.read().await;
            let mut out: Vec<AuditEntry> = entries
                .iter()
                .filter(|e| {
                    filter.min_level.is_none_or(|l| e.level >= l)
                        && filter.event.is_none_or(|ev| e.event == ev)
                        && filter
                            .user_id
                            .as_deref()
                            .is_none_or(|u| e.user_id.as_deref() == Some(u))
                })
                .cloned()
                .collect();
            if !filter.ascending {
                out.reverse();
            }
            Ok(out)
        }

        async fn range(&self, from_seq: u64, to_seq: u64) -> DomainResult<Vec<AuditEntry>> {
            Ok(self
                .entries
                .read()
                .await
                .iter()
                .filter(|e| e.seq >= from_seq && e.seq <= to_seq)
                .cloned()
                .collect())
        }

        async fn delete_before(&self, before_seq: u64) -> DomainResult<u64> {
            let mut entries = self.entries.write().await;
            let before = entries.len();
            entries.retain(|e| e.seq >= before_seq);
            Ok((before - entries.len()) as u64)
        }

        async fn first_seq(&self) -> DomainResult<Option<u64>> {
            Ok(self.entries.read().await.first().map(|e| e.seq))
        }

        async fn stats(&self) -> DomainResult<AuditStats> {
            let entries = self.entries.read().await;
            Ok(AuditStats {
                total_entries: entries.len() as u64,
                oldest_entry: entries.first().map(|e| e.timestamp),
                newest_entry: entries.last().map(|e| e.timestamp),
                ..AuditStats::default()
            })
        }
    }

    fn key() -> Vec<u8> {
        vec![7u8; 32]
    }

    async fn chain_with(store: Arc<MemStore>) -> AuditChain {
        AuditChain::open(store, key()).await.unwrap()
    }

    #[tokio::test]
    async fn test_record_chains_hashes() {
        let store = Arc::new(MemStore::default());
        let chain = chain_with(store.clone()).await;

        let first = chain
            .record(AuditDraft::info(AuditEvent::TaskCreated, "one"))
            .await
            .unwrap();
        let second = chain
            .record(AuditDraft::info(AuditEvent::TaskCompleted, "two"))
            .await
            .unwrap();

        assert_eq!(first.seq, 0);
        assert_eq!(first.prev_hash, GENESIS_HASH);
        assert_eq!(second.seq, 1);
        assert_eq!(second.prev_hash, first.hash);
        assert_eq!(second.hash.len(), 64);
        assert!(second.hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn test_rejects_short_key() {
        let store: Arc<dyn AuditStore> = Arc::new(MemStore::default());
        let result = AuditChain::open(store, vec![1u8; 16]).await;
        assert!(matches!(result, Err(DomainError::Config(_))));
    }

    #[tokio::test]
    async fn test_verify_clean_chain() {
        let store = Arc::new(MemStore::default());
        let chain = chain_with(store.clone()).await;
        for i in 0..20 {
            chain
                .record(AuditDraft::info(AuditEvent::TaskCreated, format!("t{i}")))
                .await
                .unwrap();
        }
        let report = chain.verify().await.unwrap();
        assert!(report.ok);
        assert_eq!(report.entries_checked, 20);
        assert_eq!(report.first_broken_seq, None);
    }

    #[tokio::test]
    async fn test_verify_detects_tampering() {
        let store = Arc::new(MemStore::default());
        let chain = chain_with(store.clone()).await;
        for i in 0..5 {
            chain
                .record(AuditDraft::info(AuditEvent::TaskCreated, format!("t{i}")))
                .await
                .unwrap();
        }

        store.entries.write().await[2].message = "rewritten history".into();

        let report = chain.verify().await.unwrap();
        assert!(!report.ok);
        assert_eq!(report.first_broken_seq, Some(2));
    }

    #[tokio::test]
    async fn test_failed_append_does_not_advance_head() {
        let store = Arc::new(MemStore::default());
        let chain = chain_with(store.clone()).await;
        chain
            .record(AuditDraft::info(AuditEvent::TaskCreated, "ok"))
            .await
            .unwrap();

        store.fail_appends.store(true, Ordering::SeqCst);
        let err = chain
            .record(AuditDraft::info(AuditEvent::TaskCreated, "lost"))
            .await;
        assert!(matches!(err, Err(DomainError::AuditWrite(_))));

        store.fail_appends.store(false, Ordering::SeqCst);
        let next = chain
            .record(AuditDraft::info(AuditEvent::TaskCreated, "resumed"))
            .await
            .unwrap();
        // Sequence is contiguous despite the failed attempt
        assert_eq!(next.seq, 1);
        assert!(chain.verify().await.unwrap().ok);
    }

    #[tokio::test]
    async fn test_retention_trims_tail_only() {
        let store = Arc::new(MemStore::default());
        let chain = chain_with(store.clone()).await;
        for i in 0..10 {
            chain
                .record(AuditDraft::info(AuditEvent::TaskCreated, format!("t{i}")))
                .await
                .unwrap();
        }

        let report = chain
            .enforce_retention(RetentionPolicy {
                max_entries: Some(4),
                max_age_days: None,
            })
            .await
            .unwrap();
        assert_eq!(report.deleted, 6);

        // The remainder still verifies, anchored at seq 6
        let verify = chain.verify().await.unwrap();
        assert!(verify.ok);
        assert_eq!(verify.entries_checked, 4);
        assert_eq!(store.first_seq().await.unwrap(), Some(6));

        // And new appends continue the chain
        let next = chain
            .record(AuditDraft::info(AuditEvent::RetentionEnforced, "trimmed"))
            .await
            .unwrap();
        assert_eq!(next.seq, 10);
        assert!(chain.verify().await.unwrap().ok);
    }

    #[tokio::test]
    async fn test_retention_never_deletes_head() {
        let store = Arc::new(MemStore::default());
        let chain = chain_with(store.clone()).await;
        chain
            .record(AuditDraft::info(AuditEvent::TaskCreated, "only"))
            .await
            .unwrap();

        let report = chain
            .enforce_retention(RetentionPolicy {
                max_age_days: Some(0),
                max_entries: None,
            })
            .await
            .unwrap();
        // max_age_days=0 would cover everything; the head survives
        assert_eq!(report.deleted, 0);
        assert_eq!(store.first_seq().await.unwrap(), Some(0));
    }

    #[test]
    fn test_value_hash_is_order_insensitive() {
        let a: serde_json::Value =
            serde_json::from_str(r#"{"b": 1, "a": {"y": 2, "x": 3}}"#).unwrap();
        let b: serde_json::Value =
            serde_json::from_str(r#"{"a": {"x": 3, "y": 2}, "b": 1}"#).unwrap();
        assert_eq!(sha256_hex_of_value(&a), sha256_hex_of_value(&b));
    }
}
