//! Platform adapter contract.
//!
//! Every platform (chat bridge, webhook, ...) implements this. Adapters
//! normalise inbound events into `UnifiedMessage` and MUST skip echo
//! messages originating from this agent.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::errors::DomainResult;
use crate::domain::models::{IntegrationConfigRecord, RateLimitSpec, UnifiedMessage};

/// Capabilities handed to an adapter at `init` time.
#[derive(Clone)]
pub struct IntegrationDeps {
    /// Channel the adapter pushes normalised inbound messages into.
    pub inbound: mpsc::Sender<UnifiedMessage>,
}

/// Result of an explicit connectivity probe.
#[derive(Debug, Clone)]
pub struct ConnectionTest {
    pub ok: bool,
    pub message: String,
}

/// The adapter lifecycle and messaging contract.
#[async_trait]
pub trait Integration: Send + Sync {
    /// Called exactly once, before `start`.
    async fn init(
        &mut self,
        config: &IntegrationConfigRecord,
        deps: IntegrationDeps,
    ) -> DomainResult<()>;

    /// Begin receiving/producing. Idempotent.
    async fn start(&self) -> DomainResult<()>;

    /// Stop all activity. Idempotent; `stop` after `stop` is a no-op.
    async fn stop(&self) -> DomainResult<()>;

    /// Send a message; returns the platform message id, or an empty
    /// string when the platform does not assign one.
    async fn send_message(
        &self,
        chat_id: &str,
        text: &str,
        metadata: Option<&serde_json::Value>,
    ) -> DomainResult<String>;

    /// Cheap liveness probe driven by the manager's health loop.
    fn is_healthy(&self) -> bool;

    /// Adapter-declared outbound ceiling; the manager falls back to
    /// per-platform defaults when absent.
    fn platform_rate_limit(&self) -> Option<RateLimitSpec> {
        None
    }

    /// Optional deeper connectivity check.
    async fn test_connection(&self) -> DomainResult<ConnectionTest> {
        Ok(ConnectionTest {
            ok: self.is_healthy(),
            message: String::new(),
        })
    }
}

/// Constructs adapter instances for one platform tag.
pub trait IntegrationFactory: Send + Sync {
    fn create(&self) -> Box<dyn Integration>;
}

impl<F> IntegrationFactory for F
where
    F: Fn() -> Box<dyn Integration> + Send + Sync,
{
    fn create(&self) -> Box<dyn Integration> {
        self()
    }
}
