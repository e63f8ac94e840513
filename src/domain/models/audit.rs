//! Audit chain domain model.
//!
//! Entries are hash-chained: `hash = SHA-256(prev_hash || canonical)` where
//! `canonical` is the JSON of the entry minus `hash`/`signature`, with a
//! fixed key order. The canonical form is what `verify()` recomputes, so it
//! must be byte-stable across persistence cycles.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Severity of an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

impl AuditLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

/// Event tag of an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    // Task lifecycle
    TaskCreated,
    TaskCompleted,
    TaskFailed,
    TaskTimeout,
    TaskCancelled,
    TaskRejected,
    TaskRateLimited,

    // Swarm / delegation lifecycle
    SwarmStarted,
    SwarmCompleted,
    SwarmFailed,
    SwarmCancelled,
    DelegationStarted,
    DelegationCompleted,
    DelegationFailed,

    // Integrations
    IntegrationConnected,
    IntegrationDisconnected,
    IntegrationError,
    IntegrationMessageSent,

    // Security
    AuthSuccess,
    AuthFailure,
    RateLimitExceeded,
    InjectionAttempt,
    PermissionDenied,
    Anomaly,
    SandboxViolation,
    ConfigChange,
    SecretAccess,

    // Chain maintenance
    RetentionEnforced,
}

impl AuditEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskCreated => "task_created",
            Self::TaskCompleted => "task_completed",
            Self::TaskFailed => "task_failed",
            Self::TaskTimeout => "task_timeout",
            Self::TaskCancelled => "task_cancelled",
            Self::TaskRejected => "task_rejected",
            Self::TaskRateLimited => "task_rate_limited",
            Self::SwarmStarted => "swarm_started",
            Self::SwarmCompleted => "swarm_completed",
            Self::SwarmFailed => "swarm_failed",
            Self::SwarmCancelled => "swarm_cancelled",
            Self::DelegationStarted => "delegation_started",
            Self::DelegationCompleted => "delegation_completed",
            Self::DelegationFailed => "delegation_failed",
            Self::IntegrationConnected => "integration_connected",
            Self::IntegrationDisconnected => "integration_disconnected",
            Self::IntegrationError => "integration_error",
            Self::IntegrationMessageSent => "integration_message_sent",
            Self::AuthSuccess => "auth_success",
            Self::AuthFailure => "auth_failure",
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::InjectionAttempt => "injection_attempt",
            Self::PermissionDenied => "permission_denied",
            Self::Anomaly => "anomaly",
            Self::SandboxViolation => "sandbox_violation",
            Self::ConfigChange => "config_change",
            Self::SecretAccess => "secret_access",
            Self::RetentionEnforced => "retention_enforced",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "task_created" => Some(Self::TaskCreated),
            "task_completed" => Some(Self::TaskCompleted),
            "task_failed" => Some(Self::TaskFailed),
            "task_timeout" => Some(Self::TaskTimeout),
            "task_cancelled" => Some(Self::TaskCancelled),
            "task_rejected" => Some(Self::TaskRejected),
            "task_rate_limited" => Some(Self::TaskRateLimited),
            "swarm_started" => Some(Self::SwarmStarted),
            "swarm_completed" => Some(Self::SwarmCompleted),
            "swarm_failed" => Some(Self::SwarmFailed),
            "swarm_cancelled" => Some(Self::SwarmCancelled),
            "delegation_started" => Some(Self::DelegationStarted),
            "delegation_completed" => Some(Self::DelegationCompleted),
            "delegation_failed" => Some(Self::DelegationFailed),
            "integration_connected" => Some(Self::IntegrationConnected),
            "integration_disconnected" => Some(Self::IntegrationDisconnected),
            "integration_error" => Some(Self::IntegrationError),
            "integration_message_sent" => Some(Self::IntegrationMessageSent),
            "auth_success" => Some(Self::AuthSuccess),
            "auth_failure" => Some(Self::AuthFailure),
            "rate_limit_exceeded" => Some(Self::RateLimitExceeded),
            "injection_attempt" => Some(Self::InjectionAttempt),
            "permission_denied" => Some(Self::PermissionDenied),
            "anomaly" => Some(Self::Anomaly),
            "sandbox_violation" => Some(Self::SandboxViolation),
            "config_change" => Some(Self::ConfigChange),
            "secret_access" => Some(Self::SecretAccess),
            "retention_enforced" => Some(Self::RetentionEnforced),
        _ => None,
        }
    }

    /// Security-event projection tag, for events surfaced through the
    /// curated `/api/v1/security/events` view. `None` means the event is
    /// not part of that projection.
    pub fn security_kind(&self) -> Option<&'static str> {
        match self {
            Self::AuthSuccess | Self::AuthFailure => Some("auth"),
            Self::RateLimitExceeded | Self::TaskRateLimited => Some("rate_limit"),
            Self::InjectionAttempt | Self::TaskRejected => Some("injection_attempt"),
            Self::PermissionDenied => Some("permission_denied"),
            Self::Anomaly => Some("anomaly"),
            Self::SandboxViolation => Some("sandbox_violation"),
            Self::ConfigChange => Some("config_change"),
            Self::SecretAccess => Some("secret_access"),
            _ => None,
        }
    }
}

/// A draft entry: everything the caller supplies. Sequence, hashes, and
/// signature are assigned by the chain's single writer.
#[derive(Debug, Clone)]
pub struct AuditDraft {
    pub level: AuditLevel,
    pub event: AuditEvent,
    pub message: String,
    pub user_id: Option<String>,
    pub task_id: Option<String>,
    pub correlation_id: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl AuditDraft {
    pub fn new(level: AuditLevel, event: AuditEvent, message: impl Into<String>) -> Self {
        Self {
            level,
            event,
            message: message.into(),
            user_id: None,
            task_id: None,
            correlation_id: None,
            metadata: HashMap::new(),
        }
    }

    pub fn info(event: AuditEvent, message: impl Into<String>) -> Self {
        Self::new(AuditLevel::Info, event, message)
    }

    pub fn warn(event: AuditEvent, message: impl Into<String>) -> Self {
        Self::new(AuditLevel::Warn, event, message)
    }

    pub fn error(event: AuditEvent, message: impl Into<String>) -> Self {
        Self::new(AuditLevel::Error, event, message)
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// A sealed, chained, signed audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub level: AuditLevel,
    pub event: AuditEvent,
    pub message: String,
    pub user_id: Option<String>,
    pub task_id: Option<String>,
    pub correlation_id: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub prev_hash: String,
    pub hash: String,
    pub signature: String,
}

/// Canonical wire form used for hashing. Field declaration order IS the
/// key order; `metadata` object keys sort alphabetically under serde_json,
/// which is likewise deterministic.
#[derive(Serialize)]
struct CanonicalEntry<'a> {
    seq: u64,
    timestamp: String,
    level: &'a str,
    event: &'a str,
    message: &'a str,
    #[serde(rename = "userId", skip_serializing_if = "Option::is_none")]
    user_id: Option<&'a str>,
    #[serde(rename = "taskId", skip_serializing_if = "Option::is_none")]
    task_id: Option<&'a str>,
    #[serde(rename = "correlationId", skip_serializing_if = "Option::is_none")]
    correlation_id: Option<&'a str>,
    /// Sorted map: HashMap iteration order is seeded per process and would
    /// break hash stability.
    metadata: std::collections::BTreeMap<&'a str, &'a serde_json::Value>,
    #[serde(rename = "prevHash")]
    prev_hash: &'a str,
}

impl AuditEntry {
    /// Millisecond-precision RFC 3339, the one timestamp representation
    /// that both the canonical form and the storage row use. Anything
    /// finer would not survive a persistence round-trip intact.
    pub fn canonical_timestamp(ts: &DateTime<Utc>) -> String {
        ts.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// The byte-stable JSON the hash covers.
    pub fn canonical_json(&self) -> String {
        let canonical = CanonicalEntry {
            seq: self.seq,
            timestamp: Self::canonical_timestamp(&self.timestamp),
            level: self.level.as_str(),
            event: self.event.as_str(),
            message: &self.message,
            user_id: self.user_id.as_deref(),
            task_id: self.task_id.as_deref(),
            correlation_id: self.correlation_id.as_deref(),
            metadata: self
                .metadata
                .iter()
                .map(|(k, v)| (k.as_str(), v))
                .collect(),
            prev_hash: &self.prev_hash,
        };
        serde_json::to_string(&canonical).unwrap_or_default()
    }
}

/// Filter for querying the chain. Newest-first unless `ascending`.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub min_level: Option<AuditLevel>,
    pub event: Option<AuditEvent>,
    pub user_id: Option<String>,
    pub task_id: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub ascending: bool,
}

impl AuditFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_level(mut self, level: AuditLevel) -> Self {
        self.min_level = Some(level);
        self
    }

    pub fn with_event(mut self, event: AuditEvent) -> Self {
        self.event = Some(event);
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_time_range(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn oldest_first(mut self) -> Self {
        self.ascending = true;
        self
    }
}

/// Aggregate view of the chain.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditStats {
    pub total_entries: u64,
    pub by_level: HashMap<String, u64>,
    pub by_event: HashMap<String, u64>,
    pub oldest_entry: Option<DateTime<Utc>>,
    pub newest_entry: Option<DateTime<Utc>>,
}

/// Result of a full chain verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub ok: bool,
    /// Sequence of the first entry whose link does not verify.
    pub first_broken_seq: Option<u64>,
    pub entries_checked: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry() -> AuditEntry {
        AuditEntry {
            seq: 3,
            timestamp: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
            level: AuditLevel::Info,
            event: AuditEvent::TaskCreated,
            message: "task created".into(),
            user_id: Some("u1".into()),
            task_id: None,
            correlation_id: None,
            metadata: HashMap::new(),
            prev_hash: "00".repeat(32),
            hash: String::new(),
            signature: String::new(),
        }
    }

    #[test]
    fn test_canonical_key_order() {
        let canonical = entry().canonical_json();
        let seq_pos = canonical.find("\"seq\"").unwrap();
        let ts_pos = canonical.find("\"timestamp\"").unwrap();
        let level_pos = canonical.find("\"level\"").unwrap();
        let meta_pos = canonical.find("\"metadata\"").unwrap();
        let prev_pos = canonical.find("\"prevHash\"").unwrap();
        assert!(seq_pos < ts_pos && ts_pos < level_pos && level_pos < meta_pos && meta_pos < prev_pos);
        // hash and signature are never part of the canonical form
        assert!(!canonical.contains("\"hash\""));
        assert!(!canonical.contains("\"signature\""));
    }

    #[test]
    fn test_canonical_skips_absent_optionals() {
        let canonical = entry().canonical_json();
        assert!(canonical.contains("\"userId\""));
        assert!(!canonical.contains("\"taskId\""));
        assert!(!canonical.contains("\"correlationId\""));
    }

    #[test]
    fn test_canonical_timestamp_millis() {
        let ts = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        assert_eq!(AuditEntry::canonical_timestamp(&ts), "2025-06-01T12:00:00.000Z");
    }

    #[test]
    fn test_canonical_stable_across_round_trip() {
        let e = entry();
        let first = e.canonical_json();
        // Simulate a persistence cycle through the canonical timestamp form
        let reparsed: DateTime<Utc> = AuditEntry::canonical_timestamp(&e.timestamp)
            .parse()
            .unwrap();
        let mut e2 = e.clone();
        e2.timestamp = reparsed;
        assert_eq!(first, e2.canonical_json());
    }

    #[test]
    fn test_security_projection() {
        assert_eq!(AuditEvent::PermissionDenied.security_kind(), Some("permission_denied"));
        assert_eq!(AuditEvent::AuthFailure.security_kind(), Some("auth"));
        assert_eq!(AuditEvent::TaskCompleted.security_kind(), None);
    }

    #[test]
    fn test_event_round_trip() {
        for event in [
            AuditEvent::TaskCreated,
            AuditEvent::TaskRateLimited,
            AuditEvent::SandboxViolation,
            AuditEvent::RetentionEnforced,
        ] {
            assert_eq!(AuditEvent::parse_str(event.as_str()), Some(event));
        }
    }
}
