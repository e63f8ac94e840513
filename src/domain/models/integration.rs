//! Integration domain model: platform adapter bindings and the unified
//! message shape adapters normalise into.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Connection state of a platform adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl Default for IntegrationStatus {
    fn default() -> Self {
        Self::Disconnected
    }
}

impl IntegrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "disconnected" => Some(Self::Disconnected),
            "connecting" => Some(Self::Connecting),
            "connected" => Some(Self::Connected),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Per-platform outbound send ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimitSpec {
    pub max_per_second: u32,
}

impl Default for RateLimitSpec {
    fn default() -> Self {
        Self { max_per_second: 30 }
    }
}

/// Persistent binding of a platform adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationConfigRecord {
    pub id: Uuid,
    /// Platform tag the factory registry is keyed by (`webhook`, ...).
    pub platform: String,
    pub display_name: String,
    pub enabled: bool,
    pub status: IntegrationStatus,
    /// Opaque adapter configuration. Projected into typed form by the
    /// adapter itself, never interpreted by the manager.
    pub config: HashMap<String, serde_json::Value>,
    pub message_count: u64,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl IntegrationConfigRecord {
    pub fn new(platform: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            platform: platform.into(),
            display_name: display_name.into(),
            enabled: true,
            status: IntegrationStatus::Disconnected,
            config: HashMap::new(),
            message_count: 0,
            connected_at: None,
            last_message_at: None,
            error_message: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_config(mut self, config: HashMap<String, serde_json::Value>) -> Self {
        self.config = config;
        self
    }
}

/// Direction of a persisted integration message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    Inbound,
    Outbound,
}

impl MessageDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "inbound" => Some(Self::Inbound),
            "outbound" => Some(Self::Outbound),
            _ => None,
        }
    }
}

/// Message row persisted for every send/receive through an integration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationMessage {
    pub id: Uuid,
    pub integration_id: Uuid,
    pub direction: MessageDirection,
    pub chat_id: String,
    pub text: String,
    /// Platform-assigned message id; empty when the platform returns none.
    pub platform_message_id: String,
    pub created_at: DateTime<Utc>,
}

/// Platform-neutral inbound message shape. Adapters MUST normalise the
/// platform-native event into this and MUST skip echo messages (those
/// originating from this agent).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedMessage {
    pub integration_id: Uuid,
    pub platform: String,
    pub chat_id: String,
    pub sender_id: String,
    pub sender_name: Option<String>,
    pub text: String,
    pub platform_message_id: String,
    pub received_at: DateTime<Utc>,
    /// Heterogeneous platform extras, kept opaque.
    pub metadata: HashMap<String, serde_json::Value>,
}

impl UnifiedMessage {
    pub fn new(
        integration_id: Uuid,
        platform: impl Into<String>,
        chat_id: impl Into<String>,
        sender_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            integration_id,
            platform: platform.into(),
            chat_id: chat_id.into(),
            sender_id: sender_id.into(),
            sender_name: None,
            text: text.into(),
            platform_message_id: String::new(),
            received_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for s in [
            IntegrationStatus::Disconnected,
            IntegrationStatus::Connecting,
            IntegrationStatus::Connected,
            IntegrationStatus::Error,
        ] {
            assert_eq!(IntegrationStatus::parse_str(s.as_str()), Some(s));
        }
    }

    #[test]
    fn test_default_rate_limit() {
        assert_eq!(RateLimitSpec::default().max_per_second, 30);
    }

    #[test]
    fn test_new_record_defaults() {
        let rec = IntegrationConfigRecord::new("webhook", "Ops webhook");
        assert!(rec.enabled);
        assert_eq!(rec.status, IntegrationStatus::Disconnected);
        assert_eq!(rec.message_count, 0);
        assert!(rec.error_message.is_none());
    }
}
