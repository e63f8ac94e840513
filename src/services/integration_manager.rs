//! Integration manager: platform adapter registry with health probing,
//! exponential-backoff reconnect, and token-bucket limited sends.

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::Utc;
use governor::clock::{Clock, DefaultClock};
use governor::{Quota, RateLimiter};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AuditDraft, AuditEvent, IntegrationConfigRecord, IntegrationDefaults, IntegrationMessage,
    IntegrationStatus, MessageDirection, RateLimitSpec, UnifiedMessage,
};
use crate::domain::ports::{
    Integration, IntegrationDeps, IntegrationFactory, IntegrationRepository,
};
use crate::services::audit_chain::AuditChain;

type SendLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    DefaultClock,
>;

/// Capacity of the unified inbound message channel.
const INBOUND_CHANNEL_CAPACITY: usize = 256;

/// Reconnect protocol parameters.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    pub health_check_interval: Duration,
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl From<&IntegrationDefaults> for ReconnectConfig {
    fn from(defaults: &IntegrationDefaults) -> Self {
        Self {
            health_check_interval: Duration::from_millis(defaults.health_check_interval_ms),
            max_retries: defaults.max_retries,
            base_delay: Duration::from_millis(defaults.base_delay_ms),
        }
    }
}

struct RunningIntegration {
    integration: Arc<dyn Integration>,
    healthy: bool,
}

struct ReconnectState {
    retry_count: u32,
    next_retry_at: Instant,
    schedule: ExponentialBackoff,
}

impl ReconnectState {
    fn new(base_delay: Duration) -> Self {
        Self {
            retry_count: 0,
            next_retry_at: Instant::now(),
            schedule: ExponentialBackoff {
                initial_interval: base_delay,
                randomization_factor: 0.0,
                multiplier: 2.0,
                max_interval: Duration::from_secs(300),
                max_elapsed_time: None,
                ..ExponentialBackoff::default()
            },
        }
    }
}

/// Registry and lifecycle driver for platform adapters.
pub struct IntegrationManager {
    repo: Arc<dyn IntegrationRepository>,
    audit: Arc<AuditChain>,
    factories: RwLock<HashMap<String, Arc<dyn IntegrationFactory>>>,
    running: RwLock<HashMap<Uuid, RunningIntegration>>,
    reconnect: Mutex<HashMap<Uuid, ReconnectState>>,
    send_buckets: Mutex<HashMap<Uuid, Arc<SendLimiter>>>,
    platform_defaults: HashMap<String, RateLimitSpec>,
    defaults: IntegrationDefaults,
    reconnect_config: ReconnectConfig,
    inbound_tx: mpsc::Sender<UnifiedMessage>,
    inbound_rx: Mutex<Option<mpsc::Receiver<UnifiedMessage>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl IntegrationManager {
    pub fn new(
        repo: Arc<dyn IntegrationRepository>,
        audit: Arc<AuditChain>,
        defaults: IntegrationDefaults,
    ) -> Arc<Self> {
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let (shutdown_tx, _) = watch::channel(false);
        let reconnect_config = ReconnectConfig::from(&defaults);

        Arc::new(Self {
            repo,
            audit,
            factories: RwLock::new(HashMap::new()),
            running: RwLock::new(HashMap::new()),
            reconnect: Mutex::new(HashMap::new()),
            send_buckets: Mutex::new(HashMap::new()),
            platform_defaults: HashMap::new(),
            defaults,
            reconnect_config,
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            shutdown_tx,
        })
    }

    /// Register the adapter factory for a platform tag.
    pub async fn register_factory(
        &self,
        platform: impl Into<String>,
        factory: Arc<dyn IntegrationFactory>,
    ) {
        self.factories.write().await.insert(platform.into(), factory);
    }

    /// Take the unified inbound message stream. Single consumer; callers
    /// that route messages into an agent pipeline use this directly.
    pub async fn take_inbound(&self) -> Option<mpsc::Receiver<UnifiedMessage>> {
        self.inbound_rx.lock().await.take()
    }

    /// Default inbound consumer: persist every normalised message and
    /// bump the per-integration counters. Used when no agent pipeline is
    /// attached; exits when all adapters are gone or on shutdown.
    pub fn spawn_inbound_recorder(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let manager = Arc::clone(self);

        tokio::spawn(async move {
            let Some(mut inbound) = manager.take_inbound().await else {
                return;
            };
            drop(manager); // only the weak handle keeps running state

            while let Some(message) = inbound.recv().await {
                let Some(manager) = weak.upgrade() else { break };
                let row = IntegrationMessage {
                    id: Uuid::now_v7(),
                    integration_id: message.integration_id,
                    direction: MessageDirection::Inbound,
                    chat_id: message.chat_id.clone(),
                    text: message.text.clone(),
                    platform_message_id: message.platform_message_id.clone(),
                    created_at: message.received_at,
                };
                if let Err(err) = manager.repo.append_message(&row).await {
                    tracing::error!(
                        integration_id = %message.integration_id,
                        error = %err,
                        "failed to persist inbound message"
                    );
                    continue;
                }
                if let Ok(Some(mut record)) = manager.repo.get(message.integration_id).await {
                    record.message_count += 1;
                    record.last_message_at = Some(message.received_at);
                    if let Err(err) = manager.repo.update(&record).await {
                        tracing::warn!(
                            integration_id = %message.integration_id,
                            error = %err,
                            "failed to update inbound counters"
                        );
                    }
                }
            }
        })
    }

    /// Start one integration by id. Rejects disabled or already-running
    /// bindings.
    pub async fn start_integration(&self, id: Uuid) -> DomainResult<()> {
        let mut record = self
            .repo
            .get(id)
            .await?
            .ok_or_else(|| DomainError::not_found("integration", id.to_string()))?;

        if !record.enabled {
            return Err(DomainError::Conflict(format!(
                "integration '{}' is disabled",
                record.display_name
            )));
        }
        if self.running.read().await.contains_key(&id) {
            return Err(DomainError::Conflict(format!(
                "integration '{}' is already running",
                record.display_name
            )));
        }

        let factory = self
            .factories
            .read()
            .await
            .get(&record.platform)
            .cloned()
            .ok_or_else(|| DomainError::not_found("integration platform", &record.platform))?;

        record.status = IntegrationStatus::Connecting;
        self.repo.update(&record).await?;

        let deps = IntegrationDeps {
            inbound: self.inbound_tx.clone(),
        };
        let mut adapter = factory.create();
        let startup = async {
            adapter.init(&record, deps).await?;
            let adapter: Arc<dyn Integration> = Arc::from(adapter);
            adapter.start().await?;
            Ok::<_, DomainError>(adapter)
        }
        .await;

        match startup {
            Ok(adapter) => {
                self.running.write().await.insert(
                    id,
                    RunningIntegration {
                        integration: adapter,
                        healthy: true,
                    },
                );
                self.reconnect.lock().await.remove(&id);

                record.status = IntegrationStatus::Connected;
                record.connected_at = Some(Utc::now());
                record.error_message = None;
                self.repo.update(&record).await?;
                self.audit
                    .record(
                        AuditDraft::info(
                            AuditEvent::IntegrationConnected,
                            format!("integration '{}' connected", record.display_name),
                        )
                        .with_metadata(
                            "platform",
                            serde_json::Value::String(record.platform.clone()),
                        ),
                    )
                    .await?;
                Ok(())
            }
            Err(err) => {
                record.status = IntegrationStatus::Error;
                record.error_message = Some(err.to_string());
                self.repo.update(&record).await?;
                self.audit
                    .record(
                        AuditDraft::error(
                            AuditEvent::IntegrationError,
                            format!(
                                "integration '{}' failed to start: {err}",
                                record.display_name
                            ),
                        )
                        .with_metadata(
                            "platform",
                            serde_json::Value::String(record.platform.clone()),
                        ),
                    )
                    .await?;
                Err(err)
            }
        }
    }

    /// Stop one integration. Adapter stop errors are swallowed; registry,
    /// reconnect state, and the send bucket are always cleared.
    pub async fn stop_integration(&self, id: Uuid) -> DomainResult<()> {
        let entry = self.running.write().await.remove(&id);
        if let Some(entry) = entry {
            if let Err(err) = entry.integration.stop().await {
                tracing::warn!(integration_id = %id, error = %err, "adapter stop failed");
            }
        }
        self.reconnect.lock().await.remove(&id);
        self.send_buckets.lock().await.remove(&id);

        if let Some(mut record) = self.repo.get(id).await? {
            record.status = IntegrationStatus::Disconnected;
            self.repo.update(&record).await?;
            self.audit
                .record(
                    AuditDraft::info(
                        AuditEvent::IntegrationDisconnected,
                        format!("integration '{}' stopped", record.display_name),
                    ),
                )
                .await?;
        }
        Ok(())
    }

    /// Start every enabled integration. Individual failures are logged
    /// and do not abort the batch.
    pub async fn start_all(&self) -> DomainResult<()> {
        for record in self.repo.list_enabled().await? {
            if let Err(err) = self.start_integration(record.id).await {
                tracing::error!(
                    integration = %record.display_name,
                    error = %err,
                    "integration failed to start during batch start"
                );
            }
        }
        Ok(())
    }

    /// Stop everything that is running.
    pub async fn stop_all(&self) -> DomainResult<()> {
        let ids: Vec<Uuid> = self.running.read().await.keys().copied().collect();
        for id in ids {
            if let Err(err) = self.stop_integration(id).await {
                tracing::warn!(integration_id = %id, error = %err, "stop failed during batch stop");
            }
        }
        Ok(())
    }

    /// Spawn the periodic health / reconnect loop. The task holds only a
    /// weak reference and exits with the manager or on `shutdown`.
    pub fn spawn_health_loop(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let interval = self.reconnect_config.health_check_interval;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // immediate first tick
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(manager) = weak.upgrade() else { break };
                        manager.health_tick().await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("integration health loop stopped");
        })
    }

    /// Signal the health loop to stop. Idempotent.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// One probe pass: flag unhealthy running integrations and drive any
    /// reconnects already in progress (their adapters are torn down, so
    /// they no longer show up as running).
    pub async fn health_tick(&self) {
        let mut candidates = Vec::new();
        {
            let mut running = self.running.write().await;
            for (id, entry) in running.iter_mut() {
                entry.healthy = entry.integration.is_healthy();
                if !entry.healthy {
                    candidates.push(*id);
                }
            }
        }
        {
            let running = self.running.read().await;
            let reconnect = self.reconnect.lock().await;
            for id in reconnect.keys() {
                if !running.contains_key(id) && !candidates.contains(id) {
                    candidates.push(*id);
                }
            }
        }

        for id in candidates {
            self.attempt_reconnect(id).await;
        }
    }

    async fn attempt_reconnect(&self, id: Uuid) {
        let (due, exhausted) = {
            let mut reconnect = self.reconnect.lock().await;
            let state = reconnect
                .entry(id)
                .or_insert_with(|| ReconnectState::new(self.reconnect_config.base_delay));
            if state.retry_count >= self.reconnect_config.max_retries {
                reconnect.remove(&id);
                (false, true)
            } else {
                (state.next_retry_at <= Instant::now(), false)
            }
        };

        if exhausted {
            self.give_up(id).await;
            return;
        }
        if !due {
            return;
        }

        tracing::info!(integration_id = %id, "integration unhealthy, attempting reconnect");

        // Tear down the stale adapter, swallowing its errors
        let stale = self.running.write().await.remove(&id);
        if let Some(entry) = stale {
            let _ = entry.integration.stop().await;
        }

        match self.start_integration(id).await {
            Ok(()) => {
                self.reconnect.lock().await.remove(&id);
                tracing::info!(integration_id = %id, "integration reconnected");
            }
            Err(err) => {
                let mut reconnect = self.reconnect.lock().await;
                let state = reconnect
                    .entry(id)
                    .or_insert_with(|| ReconnectState::new(self.reconnect_config.base_delay));
                state.retry_count += 1;
                let delay = state
                    .schedule
                    .next_backoff()
                    .unwrap_or(self.reconnect_config.base_delay);
                state.next_retry_at = Instant::now() + delay;
                tracing::warn!(
                    integration_id = %id,
                    retry = state.retry_count,
                    next_delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "reconnect attempt failed"
                );
            }
        }
    }

    async fn give_up(&self, id: Uuid) {
        let entry = self.running.write().await.remove(&id);
        if let Some(entry) = entry {
            let _ = entry.integration.stop().await;
        }
        self.send_buckets.lock().await.remove(&id);

        if let Ok(Some(mut record)) = self.repo.get(id).await {
            record.status = IntegrationStatus::Error;
            record.error_message = Some("Max reconnect retries exceeded".to_string());
            if let Err(err) = self.repo.update(&record).await {
                tracing::error!(integration_id = %id, error = %err, "failed to persist error status");
            }
            if let Err(err) = self
                .audit
                .record(AuditDraft::error(
                    AuditEvent::IntegrationError,
                    format!(
                        "integration '{}' removed: max reconnect retries exceeded",
                        record.display_name
                    ),
                ))
                .await
            {
                tracing::error!(integration_id = %id, error = %err, "failed to audit reconnect exhaustion");
            }
        }
    }

    /// Send through a running integration, bucketed per integration at
    /// the adapter-declared or per-platform ceiling.
    pub async fn send_message(
        &self,
        id: Uuid,
        chat_id: &str,
        text: &str,
        metadata: Option<&serde_json::Value>,
    ) -> DomainResult<String> {
        let (integration, declared_limit) = {
            let running = self.running.read().await;
            let entry = running.get(&id).ok_or_else(|| {
                DomainError::Conflict(format!("integration {id} is not running"))
            })?;
            (
                Arc::clone(&entry.integration),
                entry.integration.platform_rate_limit(),
            )
        };

        let mut record = self
            .repo
            .get(id)
            .await?
            .ok_or_else(|| DomainError::not_found("integration", id.to_string()))?;

        let bucket = self
            .bucket_for(id, &record.platform, declared_limit)
            .await;
        if let Err(not_until) = bucket.check() {
            let wait = not_until.wait_time_from(DefaultClock::default().now());
            return Err(DomainError::RateLimited {
                rule: format!("integration:{}", record.platform),
                retry_after_secs: wait.as_secs().max(1),
            });
        }

        let platform_message_id = integration.send_message(chat_id, text, metadata).await?;

        let message = IntegrationMessage {
            id: Uuid::now_v7(),
            integration_id: id,
            direction: MessageDirection::Outbound,
            chat_id: chat_id.to_string(),
            text: text.to_string(),
            platform_message_id: platform_message_id.clone(),
            created_at: Utc::now(),
        };
        self.repo.append_message(&message).await?;

        record.message_count += 1;
        record.last_message_at = Some(Utc::now());
        self.repo.update(&record).await?;

        self.audit
            .record(
                AuditDraft::info(
                    AuditEvent::IntegrationMessageSent,
                    format!("message sent via '{}'", record.display_name),
                )
                .with_metadata("chat_id", serde_json::Value::String(chat_id.to_string())),
            )
            .await?;

        Ok(platform_message_id)
    }

    /// Whether an integration is currently registered as running.
    pub async fn is_running(&self, id: Uuid) -> bool {
        self.running.read().await.contains_key(&id)
    }

    /// Run the adapter's deeper connectivity probe.
    pub async fn test_connection(
        &self,
        id: Uuid,
    ) -> DomainResult<crate::domain::ports::ConnectionTest> {
        let integration = {
            let running = self.running.read().await;
            running
                .get(&id)
                .map(|entry| Arc::clone(&entry.integration))
                .ok_or_else(|| {
                    DomainError::Conflict(format!("integration {id} is not running"))
                })?
        };
        integration.test_connection().await
    }

    /// Current health flag from the last probe pass.
    pub async fn is_healthy(&self, id: Uuid) -> Option<bool> {
        self.running.read().await.get(&id).map(|e| e.healthy)
    }

    pub async fn running_count(&self) -> usize {
        self.running.read().await.len()
    }

    async fn bucket_for(
        &self,
        id: Uuid,
        platform: &str,
        declared: Option<RateLimitSpec>,
    ) -> Arc<SendLimiter> {
        let mut buckets = self.send_buckets.lock().await;
        if let Some(bucket) = buckets.get(&id) {
            return Arc::clone(bucket);
        }

        let spec = declared
            .or_else(|| self.platform_defaults.get(platform).copied())
            .unwrap_or(RateLimitSpec {
                max_per_second: self.defaults.default_max_per_second,
            });
        let per_second =
            NonZeroU32::new(spec.max_per_second.max(1)).unwrap_or(NonZeroU32::MIN);
        let bucket = Arc::new(RateLimiter::direct(Quota::per_second(per_second)));
        buckets.insert(id, Arc::clone(&bucket));
        bucket
    }
}
