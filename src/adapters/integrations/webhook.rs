//! Webhook platform adapter: outbound messages are POSTed as JSON to a
//! configured URL, optionally HMAC-signed. The reference implementation
//! of the adapter contract.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{IntegrationConfigRecord, RateLimitSpec, UnifiedMessage};
use crate::domain::ports::{ConnectionTest, Integration, IntegrationDeps};

type HmacSha256 = Hmac<Sha256>;

/// Request timeout for deliveries and probes.
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

struct WebhookConfig {
    integration_id: Uuid,
    url: String,
    secret: Option<String>,
    max_per_second: Option<u32>,
}

/// Outbound-only webhook bridge.
#[derive(Default)]
pub struct WebhookIntegration {
    config: RwLock<Option<WebhookConfig>>,
    client: RwLock<Option<reqwest::Client>>,
    running: AtomicBool,
    healthy: AtomicBool,
    deps: RwLock<Option<IntegrationDeps>>,
}

impl WebhookIntegration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn boxed() -> Box<dyn Integration> {
        Box::new(Self::new())
    }

    fn sign(secret: &str, body: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(body.as_bytes());
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    /// Feed an inbound platform event through echo suppression and into
    /// the unified channel. Exposed for bridges that receive callbacks.
    pub async fn ingest(&self, message: UnifiedMessage, own_sender_id: &str) -> DomainResult<()> {
        // Echo messages (our own outbound reflected back) are skipped
        if message.sender_id == own_sender_id {
            return Ok(());
        }
        let deps = self.deps.read().await;
        let Some(deps) = deps.as_ref() else {
            return Err(DomainError::Conflict("webhook adapter not initialised".into()));
        };
        deps.inbound
            .send(message)
            .await
            .map_err(|_| DomainError::DependencyUnavailable("inbound channel closed".into()))
    }
}

#[async_trait]
impl Integration for WebhookIntegration {
    async fn init(
        &mut self,
        config: &IntegrationConfigRecord,
        deps: IntegrationDeps,
    ) -> DomainResult<()> {
        let url = config
            .config
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                DomainError::Config(format!(
                    "integrations.{}.config.url: required",
                    config.display_name
                ))
            })?
            .to_string();
        let secret = config
            .config
            .get("secret")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let max_per_second = config
            .config
            .get("max_per_second")
            .and_then(serde_json::Value::as_u64)
            .and_then(|v| u32::try_from(v).ok());

        let client = reqwest::Client::builder()
            .timeout(DELIVERY_TIMEOUT)
            .build()
            .map_err(|e| DomainError::DependencyUnavailable(format!("http client: {e}")))?;

        *self.config.write().await = Some(WebhookConfig {
            integration_id: config.id,
            url,
            secret,
            max_per_second,
        });
        *self.client.write().await = Some(client);
        *self.deps.write().await = Some(deps);
        Ok(())
    }

    async fn start(&self) -> DomainResult<()> {
        self.running.store(true, Ordering::SeqCst);
        self.healthy.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> DomainResult<()> {
        // stop after stop is a no-op
        self.running.store(false, Ordering::SeqCst);
        self.healthy.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn send_message(
        &self,
        chat_id: &str,
        text: &str,
        metadata: Option<&serde_json::Value>,
    ) -> DomainResult<String> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(DomainError::Conflict("webhook adapter is not running".into()));
        }

        let config = self.config.read().await;
        let config = config
            .as_ref()
            .ok_or_else(|| DomainError::Conflict("webhook adapter not initialised".into()))?;
        let client = self.client.read().await;
        let client = client
            .as_ref()
            .ok_or_else(|| DomainError::Conflict("webhook adapter not initialised".into()))?;

        let payload = serde_json::json!({
            "integration_id": config.integration_id,
            "chat_id": chat_id,
            "text": text,
            "metadata": metadata,
        });
        let body = payload.to_string();

        let mut request = client
            .post(&config.url)
            .header("Content-Type", "application/json");
        if let Some(secret) = &config.secret {
            request = request.header("X-Warden-Signature", Self::sign(secret, &body));
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| {
                self.healthy.store(false, Ordering::SeqCst);
                DomainError::DependencyUnavailable(format!("webhook delivery failed: {e}"))
            })?;

        if !response.status().is_success() {
            self.healthy.store(false, Ordering::SeqCst);
            return Err(DomainError::DependencyUnavailable(format!(
                "webhook endpoint answered {}",
                response.status()
            )));
        }
        self.healthy.store(true, Ordering::SeqCst);

        // The endpoint may return a message id; empty string otherwise
        let id = response
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|v| {
                v.get("message_id")
                    .and_then(|id| id.as_str())
                    .map(str::to_string)
            })
            .unwrap_or_default();
        Ok(id)
    }

    fn is_healthy(&self) -> bool {
        self.running.load(Ordering::SeqCst) && self.healthy.load(Ordering::SeqCst)
    }

    fn platform_rate_limit(&self) -> Option<RateLimitSpec> {
        // Read without await: declared limit is immutable after init
        self.config
            .try_read()
            .ok()
            .and_then(|config| config.as_ref().and_then(|c| c.max_per_second))
            .map(|max_per_second| RateLimitSpec { max_per_second })
    }

    async fn test_connection(&self) -> DomainResult<ConnectionTest> {
        let config = self.config.read().await;
        let Some(config) = config.as_ref() else {
            return Ok(ConnectionTest {
                ok: false,
                message: "not initialised".into(),
            });
        };
        let client = self.client.read().await;
        let Some(client) = client.as_ref() else {
            return Ok(ConnectionTest {
                ok: false,
                message: "not initialised".into(),
            });
        };

        match client.head(&config.url).send().await {
            Ok(response) => Ok(ConnectionTest {
                ok: response.status().is_success()
                    || response.status() == reqwest::StatusCode::METHOD_NOT_ALLOWED,
                message: format!("endpoint answered {}", response.status()),
            }),
            Err(err) => Ok(ConnectionTest {
                ok: false,
                message: format!("endpoint unreachable: {err}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_format() {
        let signature = WebhookIntegration::sign("secret", "{\"a\":1}");
        assert!(signature.starts_with("sha256="));
        assert_eq!(signature.len(), "sha256=".len() + 64);
        // Deterministic for the same key and body
        assert_eq!(signature, WebhookIntegration::sign("secret", "{\"a\":1}"));
        assert_ne!(signature, WebhookIntegration::sign("other", "{\"a\":1}"));
    }

    #[tokio::test]
    async fn test_send_rejected_before_start() {
        let adapter = WebhookIntegration::new();
        let err = adapter.send_message("chat", "hi", None).await;
        assert!(matches!(err, Err(DomainError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let adapter = WebhookIntegration::new();
        adapter.start().await.unwrap();
        assert!(adapter.is_healthy());
        adapter.stop().await.unwrap();
        adapter.stop().await.unwrap();
        assert!(!adapter.is_healthy());
    }

    #[tokio::test]
    async fn test_echo_messages_skipped() {
        let adapter = WebhookIntegration::new();
        let (tx, mut rx) = tokio::sync::mpsc::channel(4);
        *adapter.deps.write().await = Some(IntegrationDeps { inbound: tx });

        let own = "warden-bot";
        let echo = UnifiedMessage::new(Uuid::now_v7(), "webhook", "chat", own, "echo");
        adapter.ingest(echo, own).await.unwrap();

        let real = UnifiedMessage::new(Uuid::now_v7(), "webhook", "chat", "alice", "hello");
        adapter.ingest(real, own).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.sender_id, "alice");
        assert!(rx.try_recv().is_err(), "echo must have been suppressed");
    }
}
