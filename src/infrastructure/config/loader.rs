//! Hierarchical configuration loading with field-path validation errors.

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::Config;

/// Loads and validates the effective configuration.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load with hierarchical merging.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults
    /// 2. .warden/config.yaml (project config)
    /// 3. .warden/local.yaml (local overrides, optional)
    /// 4. Environment variables (WARDEN_* prefix)
    pub fn load() -> DomainResult<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".warden/config.yaml"))
            .merge(Yaml::file(".warden/local.yaml"))
            .merge(Env::prefixed("WARDEN_").split("__"))
            .extract()
            .map_err(|e| DomainError::Config(e.to_string()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load from one explicit file (plus defaults).
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> DomainResult<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .map_err(|e| DomainError::Config(e.to_string()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Structural validation. Error messages carry the config field path.
    pub fn validate(config: &Config) -> DomainResult<()> {
        if config.database.path.is_empty() {
            return Err(DomainError::Config("database.path: must not be empty".into()));
        }
        if config.database.max_connections == 0 {
            return Err(DomainError::Config(
                "database.max_connections: must be at least 1".into(),
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&config.logging.level.as_str()) {
            return Err(DomainError::Config(format!(
                "logging.level: '{}' is not one of trace, debug, info, warn, error",
                config.logging.level
            )));
        }

        if config.executor.max_concurrent == 0 || config.executor.max_concurrent > 256 {
            return Err(DomainError::Config(format!(
                "executor.max_concurrent: {} is outside [1, 256]",
                config.executor.max_concurrent
            )));
        }
        if config.executor.default_timeout_ms == 0 {
            return Err(DomainError::Config(
                "executor.default_timeout_ms: must be positive".into(),
            ));
        }
        if config.executor.default_timeout_ms > config.executor.max_timeout_ms {
            return Err(DomainError::Config(format!(
                "executor.default_timeout_ms: {} exceeds executor.max_timeout_ms {}",
                config.executor.default_timeout_ms, config.executor.max_timeout_ms
            )));
        }

        for (index, rule) in config.rate_rules.iter().enumerate() {
            if rule.name.is_empty() {
                return Err(DomainError::Config(format!(
                    "rate_rules[{index}].name: must not be empty"
                )));
            }
            if rule.window_ms == 0 {
                return Err(DomainError::Config(format!(
                    "rate_rules[{index}].window_ms: must be positive"
                )));
            }
            if rule.max_requests == 0 {
                return Err(DomainError::Config(format!(
                    "rate_rules[{index}].max_requests: must be positive"
                )));
            }
        }

        if config.gateway.tls.enabled {
            if config.gateway.tls.cert_path.is_none() {
                return Err(DomainError::Config(
                    "gateway.tls.cert_path: required when tls is enabled".into(),
                ));
            }
            if config.gateway.tls.key_path.is_none() {
                return Err(DomainError::Config(
                    "gateway.tls.key_path: required when tls is enabled".into(),
                ));
            }
        }
        if config.gateway.metrics_broadcast_ms == 0 {
            return Err(DomainError::Config(
                "gateway.metrics_broadcast_ms: must be positive".into(),
            ));
        }
        if config.gateway.heartbeat_interval_ms == 0 {
            return Err(DomainError::Config(
                "gateway.heartbeat_interval_ms: must be positive".into(),
            ));
        }

        if config.swarm.max_depth == 0 {
            return Err(DomainError::Config("swarm.max_depth: must be positive".into()));
        }
        if config.swarm.default_token_budget == 0 {
            return Err(DomainError::Config(
                "swarm.default_token_budget: must be positive".into(),
            ));
        }
        if config.integrations.health_check_interval_ms == 0 {
            return Err(DomainError::Config(
                "integrations.health_check_interval_ms: must be positive".into(),
            ));
        }
        if config.integrations.max_retries == 0 {
            return Err(DomainError::Config(
                "integrations.max_retries: must be positive".into(),
            ));
        }

        Ok(())
    }

    /// Resolve the audit signing key from the configured environment
    /// variable. The key must carry at least 32 bytes.
    pub fn resolve_signing_key(config: &Config) -> DomainResult<Vec<u8>> {
        let raw = std::env::var(&config.audit.signing_key_env).map_err(|_| {
            DomainError::Config(format!(
                "audit.signing_key_env: required secret {} not set",
                config.audit.signing_key_env
            ))
        })?;
        if raw.len() < 32 {
            return Err(DomainError::Config(format!(
                "audit.signing_key_env: secret {} must be at least 32 bytes",
                config.audit.signing_key_env
            )));
        }
        Ok(raw.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::RateRuleConfig;

    #[test]
    fn test_defaults_validate() {
        let config = Config::default();
        assert!(ConfigLoader::validate(&config).is_ok());
    }

    #[test]
    fn test_invalid_timeouts_rejected() {
        let mut config = Config::default();
        config.executor.default_timeout_ms = config.executor.max_timeout_ms + 1;
        let err = ConfigLoader::validate(&config).unwrap_err();
        assert!(err.to_string().contains("executor.default_timeout_ms"));
    }

    #[test]
    fn test_rate_rule_paths_in_errors() {
        let mut config = Config::default();
        config.rate_rules = vec![RateRuleConfig {
            window_ms: 0,
            ..RateRuleConfig::task_creation_default()
        }];
        let err = ConfigLoader::validate(&config).unwrap_err();
        assert!(err.to_string().contains("rate_rules[0].window_ms"));
    }

    #[test]
    fn test_tls_requires_paths() {
        let mut config = Config::default();
        config.gateway.tls.enabled = true;
        let err = ConfigLoader::validate(&config).unwrap_err();
        assert!(err.to_string().contains("gateway.tls.cert_path"));
    }

    #[test]
    fn test_signing_key_resolution() {
        let mut config = Config::default();
        config.audit.signing_key_env = "WARDEN_TEST_SIGNING_KEY".into();

        temp_env::with_var("WARDEN_TEST_SIGNING_KEY", None::<&str>, || {
            let err = ConfigLoader::resolve_signing_key(&config).unwrap_err();
            assert!(err.to_string().contains("required secret"));
        });

        temp_env::with_var("WARDEN_TEST_SIGNING_KEY", Some("too-short"), || {
            let err = ConfigLoader::resolve_signing_key(&config).unwrap_err();
            assert!(err.to_string().contains("at least 32 bytes"));
        });

        temp_env::with_var(
            "WARDEN_TEST_SIGNING_KEY",
            Some("0123456789abcdef0123456789abcdef"),
            || {
                let key = ConfigLoader::resolve_signing_key(&config).unwrap();
                assert_eq!(key.len(), 32);
            },
        );
    }

    #[test]
    fn test_env_overrides() {
        temp_env::with_var("WARDEN_GATEWAY__PORT", Some("9999"), || {
            let config = ConfigLoader::load().unwrap();
            assert_eq!(config.gateway.port, 9999);
        });
    }
}
