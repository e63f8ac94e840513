//! Tracing subscriber initialisation.

use std::io;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{LogConfig, LogFormat, RotationPolicy};

/// Holds the appender guard so buffered log lines flush on drop.
pub struct Logger {
    _guard: Option<WorkerGuard>,
}

impl Logger {
    /// Initialise the global subscriber from config. Call once.
    pub fn init(config: &LogConfig) -> DomainResult<Self> {
        let default_level = parse_level(&config.level)?;
        let env_filter = EnvFilter::builder()
            .with_default_directive(default_level.into())
            .from_env_lossy();

        let guard = if let Some(log_dir) = &config.log_dir {
            let appender = match config.rotation {
                RotationPolicy::Daily => rolling::daily(log_dir, "warden.log"),
                RotationPolicy::Hourly => rolling::hourly(log_dir, "warden.log"),
                RotationPolicy::Never => rolling::never(log_dir, "warden.log"),
            };
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);

            // File output is always JSON for post-hoc querying
            let file_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true)
                .with_filter(env_filter);

            if config.enable_stdout {
                let stdout_filter = EnvFilter::builder()
                    .with_default_directive(default_level.into())
                    .from_env_lossy();
                match config.format {
                    LogFormat::Json => {
                        let stdout_layer = tracing_subscriber::fmt::layer()
                            .json()
                            .with_writer(io::stdout)
                            .with_target(true)
                            .with_filter(stdout_filter);
                        tracing_subscriber::registry()
                            .with(file_layer)
                            .with(stdout_layer)
                            .init();
                    }
                    LogFormat::Pretty => {
                        let stdout_layer = tracing_subscriber::fmt::layer()
                            .pretty()
                            .with_writer(io::stdout)
                            .with_target(true)
                            .with_filter(stdout_filter);
                        tracing_subscriber::registry()
                            .with(file_layer)
                            .with(stdout_layer)
                            .init();
                    }
                }
            } else {
                tracing_subscriber::registry().with(file_layer).init();
            }
            Some(guard)
        } else {
            match config.format {
                LogFormat::Json => {
                    let layer = tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(io::stdout)
                        .with_target(true)
                        .with_filter(env_filter);
                    tracing_subscriber::registry().with(layer).init();
                }
                LogFormat::Pretty => {
                    let layer = tracing_subscriber::fmt::layer()
                        .pretty()
                        .with_writer(io::stdout)
                        .with_target(true)
                        .with_filter(env_filter);
                    tracing_subscriber::registry().with(layer).init();
                }
            }
            None
        };

        Ok(Self { _guard: guard })
    }
}

fn parse_level(raw: &str) -> DomainResult<Level> {
    match raw.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(DomainError::Config(format!(
            "logging.level: '{other}' is not one of trace, debug, info, warn, error"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("info").unwrap(), Level::INFO);
        assert_eq!(parse_level("WARN").unwrap(), Level::WARN);
        assert!(parse_level("loud").is_err());
    }
}
