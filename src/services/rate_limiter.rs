//! Named-rule token bucket rate limiter.
//!
//! Each rule owns a family of buckets keyed by user, ip, or a single
//! global key. Tokens refill proportionally to elapsed time up to
//! `max_requests` per `window_ms`; one token is deducted per allowed
//! request. Idle buckets are garbage-collected after at least one full
//! window without use.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{RateKeyType, RateOnExceed, RateRuleConfig, SecurityContext};

/// How often the GC pass scans for idle buckets.
const GC_INTERVAL: Duration = Duration::from_secs(30);

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Seconds until a token will be available; 0 when allowed.
    pub retry_after_secs: u64,
}

impl RateDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            retry_after_secs: 0,
        }
    }
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
    last_used: Instant,
}

/// Thread-safe limiter shared by the executor and the gateway.
pub struct RateLimiterService {
    rules: HashMap<String, RateRuleConfig>,
    buckets: Arc<Mutex<HashMap<String, Bucket>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl RateLimiterService {
    /// Build from configured rules and start the background GC task.
    pub fn new(rules: Vec<RateRuleConfig>) -> Self {
        let rules: HashMap<String, RateRuleConfig> =
            rules.into_iter().map(|r| (r.name.clone(), r)).collect();
        let buckets: Arc<Mutex<HashMap<String, Bucket>>> = Arc::new(Mutex::new(HashMap::new()));
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        {
            let buckets = Arc::clone(&buckets);
            let windows: HashMap<String, u64> = rules
                .values()
                .map(|r| (r.name.clone(), r.window_ms))
                .collect();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(GC_INTERVAL);
                interval.tick().await; // first tick fires immediately
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            Self::collect_idle(&buckets, &windows).await;
                        }
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() || *shutdown_rx.borrow() {
                                break;
                            }
                        }
                    }
                }
            });
        }

        Self {
            rules,
            buckets,
            shutdown_tx,
        }
    }

    /// Cancel the GC task. Idempotent.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Check admission under `rule_name` for the given subject.
    ///
    /// `reject` rules answer immediately with a retry-after hint;
    /// `throttle` rules wait for the next token instead of denying.
    pub async fn check(
        &self,
        rule_name: &str,
        subject: &SecurityContext,
    ) -> DomainResult<RateDecision> {
        let rule = self
            .rules
            .get(rule_name)
            .ok_or_else(|| DomainError::not_found("rate rule", rule_name))?;

        let key = bucket_key(rule, subject);

        loop {
            let wait = {
                let mut buckets = self.buckets.lock().await;
                let now = Instant::now();
                let max = f64::from(rule.max_requests);
                let refill_per_sec = max / (rule.window_ms as f64 / 1000.0);

                let bucket = buckets.entry(key.clone()).or_insert_with(|| Bucket {
                    tokens: max,
                    last_refill: now,
                    last_used: now,
                });

                // Refill proportionally to elapsed time, capped at max
                let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
                bucket.tokens = (bucket.tokens + elapsed * refill_per_sec).min(max);
                bucket.last_refill = now;
                bucket.last_used = now;

                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return Ok(RateDecision::allow());
                }

                let deficit = 1.0 - bucket.tokens;
                Duration::from_secs_f64(deficit / refill_per_sec)
            };

            match rule.on_exceed {
                RateOnExceed::Reject => {
                    return Ok(RateDecision {
                        allowed: false,
                        retry_after_secs: wait.as_secs_f64().ceil() as u64,
                    });
                }
                // Lock released above; wait out the deficit and retry
                RateOnExceed::Throttle => tokio::time::sleep(wait).await,
            }
        }
    }

    /// Number of live buckets, for monitoring and tests.
    pub async fn bucket_count(&self) -> usize {
        self.buckets.lock().await.len()
    }

    async fn collect_idle(
        buckets: &Arc<Mutex<HashMap<String, Bucket>>>,
        windows: &HashMap<String, u64>,
    ) {
        let now = Instant::now();
        let mut buckets = buckets.lock().await;
        let before = buckets.len();
        buckets.retain(|key, bucket| {
            let window_ms = key
                .split_once(':')
                .and_then(|(rule, _)| windows.get(rule))
                .copied()
                .unwrap_or(60_000);
            now.duration_since(bucket.last_used) < Duration::from_millis(window_ms)
        });
        let removed = before - buckets.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = buckets.len(), "rate limiter GC pass");
        }
    }
}

fn bucket_key(rule: &RateRuleConfig, subject: &SecurityContext) -> String {
    match rule.key_type {
        RateKeyType::User => format!("{}:user:{}", rule.name, subject.user_id),
        RateKeyType::Ip => format!(
            "{}:ip:{}",
            rule.name,
            subject.ip_address.as_deref().unwrap_or("unknown")
        ),
        RateKeyType::Global => format!("{}:global", rule.name),
    }
}
