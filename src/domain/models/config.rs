//! Runtime configuration model.
//!
//! Loaded hierarchically (defaults, YAML, env) by the config loader;
//! validated with field-path error messages before anything starts.

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub logging: LogConfig,
    pub gateway: GatewayConfig,
    pub executor: ExecutorConfig,
    pub rate_rules: Vec<RateRuleConfig>,
    pub audit: AuditConfig,
    pub swarm: SwarmConfig,
    pub integrations: IntegrationDefaults,
    pub validation: ValidationConfig,
}

/// SQLite storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: ".warden/warden.db".to_string(),
            max_connections: 10,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

/// File rotation policy for the rolling appender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotationPolicy {
    Daily,
    Hourly,
    Never,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
    /// When set, JSON logs are also written to rolling files here.
    pub log_dir: Option<String>,
    pub enable_stdout: bool,
    pub rotation: RotationPolicy,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            log_dir: None,
            enable_stdout: true,
            rotation: RotationPolicy::Daily,
        }
    }
}

/// TLS settings for the gateway. When enabled, `cert_path` and `key_path`
/// are required; `ca_path` additionally switches on mTLS.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    pub enabled: bool,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
    pub ca_path: Option<String>,
}

/// A bearer token principal. The token value itself is resolved from the
/// named environment variable at startup, never stored in config files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthTokenConfig {
    pub token_env: String,
    pub user_id: String,
    pub role: String,
}

/// Gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listen host. Must resolve to a loopback or private address.
    pub host: String,
    pub port: u16,
    /// CORS origin allow-list. Empty list disables CORS entirely.
    pub cors_origins: Vec<String>,
    pub cors_allow_credentials: bool,
    pub tls: TlsConfig,
    pub auth_tokens: Vec<AuthTokenConfig>,
    /// Interval of the change-gated metrics broadcast.
    pub metrics_broadcast_ms: u64,
    /// WS ping cadence; clients silent for twice this are evicted.
    pub heartbeat_interval_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9400,
            cors_origins: Vec::new(),
            cors_allow_credentials: false,
            tls: TlsConfig::default(),
            auth_tokens: Vec::new(),
            metrics_broadcast_ms: 5_000,
            heartbeat_interval_ms: 30_000,
        }
    }
}

/// Sandbox resource caps applied around handler execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub enabled: bool,
    pub max_memory_mb: f64,
    pub max_cpu_ms: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_memory_mb: 512.0,
            max_cpu_ms: 60_000,
        }
    }
}

/// Task executor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub max_concurrent: usize,
    pub default_timeout_ms: u64,
    pub max_timeout_ms: u64,
    pub sandbox: SandboxConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 8,
            default_timeout_ms: 60_000,
            max_timeout_ms: 600_000,
            sandbox: SandboxConfig::default(),
        }
    }
}

/// Subject a rate rule buckets on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateKeyType {
    User,
    Ip,
    Global,
}

/// What happens when a rule is exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateOnExceed {
    /// Deny immediately with a retry-after hint.
    Reject,
    /// Wait for the next token instead of denying.
    Throttle,
}

/// One named admission rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateRuleConfig {
    pub name: String,
    pub window_ms: u64,
    pub max_requests: u32,
    pub key_type: RateKeyType,
    pub on_exceed: RateOnExceed,
}

impl RateRuleConfig {
    /// The rule every task submission passes through.
    pub fn task_creation_default() -> Self {
        Self {
            name: "task_creation".to_string(),
            window_ms: 60_000,
            max_requests: 30,
            key_type: RateKeyType::User,
            on_exceed: RateOnExceed::Reject,
        }
    }
}

/// Audit chain settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Environment variable holding the HMAC signing key. The resolved
    /// key must carry at least 32 bytes.
    pub signing_key_env: String,
    pub retention_max_age_days: Option<u32>,
    pub retention_max_entries: Option<u64>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            signing_key_env: "WARDEN_AUDIT_SIGNING_KEY".to_string(),
            retention_max_age_days: None,
            retention_max_entries: None,
        }
    }
}

/// Swarm and delegation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmConfig {
    pub max_depth: u32,
    pub default_token_budget: u64,
    /// Coordinator profile used by dynamic templates that name none.
    pub default_coordinator_profile: String,
    pub delegation_timeout_ms: u64,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            default_token_budget: 200_000,
            default_coordinator_profile: "researcher".to_string(),
            delegation_timeout_ms: 120_000,
        }
    }
}

/// Integration manager defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrationDefaults {
    pub health_check_interval_ms: u64,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub default_max_per_second: u32,
}

impl Default for IntegrationDefaults {
    fn default() -> Self {
        Self {
            health_check_interval_ms: 30_000,
            max_retries: 5,
            base_delay_ms: 1_000,
            default_max_per_second: 30,
        }
    }
}

/// Input screening limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub max_input_length: usize,
    pub max_file_bytes: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_input_length: 64 * 1024,
            max_file_bytes: 10 * 1024 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_local_first() {
        let config = Config::default();
        assert_eq!(config.gateway.host, "127.0.0.1");
        assert!(!config.gateway.tls.enabled);
        assert!(config.executor.max_concurrent > 0);
        assert!(config.executor.default_timeout_ms <= config.executor.max_timeout_ms);
    }

    #[test]
    fn test_task_creation_rule_defaults() {
        let rule = RateRuleConfig::task_creation_default();
        assert_eq!(rule.name, "task_creation");
        assert_eq!(rule.key_type, RateKeyType::User);
        assert_eq!(rule.on_exceed, RateOnExceed::Reject);
    }

    #[test]
    fn test_config_serde_round_trip() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let back: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.gateway.port, config.gateway.port);
        assert_eq!(back.audit.signing_key_env, config.audit.signing_key_env);
    }
}
