//! Runtime metrics: one snapshot shape serves both the Prometheus text
//! endpoint and the change-gated WebSocket broadcast.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::domain::errors::DomainResult;
use crate::domain::models::TaskStatus;
use crate::domain::ports::TaskRepository;
use crate::services::audit_chain::AuditChain;
use crate::services::integration_manager::IntegrationManager;
use crate::services::task_executor::TaskExecutor;

/// Point-in-time view of the substrate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub tasks_pending: u64,
    pub tasks_running: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub tasks_timeout: u64,
    pub tasks_cancelled: u64,
    pub queue_depth: u64,
    pub active_tasks: u64,
    pub ws_clients: u64,
    pub integrations_running: u64,
    pub audit_entries: u64,
    pub http_requests_total: u64,
}

/// Collects gauges/counters and composes snapshots on demand.
pub struct MetricsService {
    started_at: Instant,
    repo: Arc<dyn TaskRepository>,
    executor: Arc<TaskExecutor>,
    integrations: Arc<IntegrationManager>,
    audit: Arc<AuditChain>,
    ws_clients: AtomicUsize,
    http_requests: AtomicU64,
}

impl MetricsService {
    pub fn new(
        repo: Arc<dyn TaskRepository>,
        executor: Arc<TaskExecutor>,
        integrations: Arc<IntegrationManager>,
        audit: Arc<AuditChain>,
    ) -> Self {
        Self {
            started_at: Instant::now(),
            repo,
            executor,
            integrations,
            audit,
            ws_clients: AtomicUsize::new(0),
            http_requests: AtomicU64::new(0),
        }
    }

    pub fn record_http_request(&self) {
        self.http_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ws_client_connected(&self) {
        self.ws_clients.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ws_client_disconnected(&self) {
        let _ = self
            .ws_clients
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(1))
            });
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub async fn snapshot(&self) -> DomainResult<MetricsSnapshot> {
        let audit_stats = self.audit.stats().await?;
        Ok(MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            tasks_pending: self.repo.count_by_status(TaskStatus::Pending).await?,
            tasks_running: self.repo.count_by_status(TaskStatus::Running).await?,
            tasks_completed: self.repo.count_by_status(TaskStatus::Completed).await?,
            tasks_failed: self.repo.count_by_status(TaskStatus::Failed).await?,
            tasks_timeout: self.repo.count_by_status(TaskStatus::Timeout).await?,
            tasks_cancelled: self.repo.count_by_status(TaskStatus::Cancelled).await?,
            queue_depth: self.executor.queue_depth().await as u64,
            active_tasks: self.executor.active_count().await as u64,
            ws_clients: self.ws_clients.load(Ordering::Relaxed) as u64,
            integrations_running: self.integrations.running_count().await as u64,
            audit_entries: audit_stats.total_entries,
            http_requests_total: self.http_requests.load(Ordering::Relaxed),
        })
    }
}

/// Prometheus text exposition (format version 0.0.4).
pub fn prometheus_text(snapshot: &MetricsSnapshot) -> String {
    let mut out = String::with_capacity(1024);
    let mut gauge = |name: &str, help: &str, value: u64| {
        out.push_str(&format!(
            "# HELP warden_{name} {help}\n# TYPE warden_{name} gauge\nwarden_{name} {value}\n"
        ));
    };
    gauge("uptime_seconds", "Process uptime in seconds", snapshot.uptime_secs);
    gauge("tasks_pending", "Tasks waiting in the queue state", snapshot.tasks_pending);
    gauge("tasks_running", "Tasks currently executing", snapshot.tasks_running);
    gauge("tasks_completed_total", "Tasks finished successfully", snapshot.tasks_completed);
    gauge("tasks_failed_total", "Tasks that failed", snapshot.tasks_failed);
    gauge("tasks_timeout_total", "Tasks that timed out", snapshot.tasks_timeout);
    gauge("tasks_cancelled_total", "Tasks that were cancelled", snapshot.tasks_cancelled);
    gauge("executor_queue_depth", "Submissions awaiting admission", snapshot.queue_depth);
    gauge("executor_active", "In-flight executions", snapshot.active_tasks);
    gauge("ws_clients", "Connected WebSocket clients", snapshot.ws_clients);
    gauge(
        "integrations_running",
        "Running platform integrations",
        snapshot.integrations_running,
    );
    gauge("audit_entries", "Entries in the audit chain", snapshot.audit_entries);
    gauge(
        "http_requests_total",
        "HTTP requests served",
        snapshot.http_requests_total,
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: 12,
            tasks_pending: 1,
            tasks_running: 2,
            tasks_completed: 3,
            tasks_failed: 0,
            tasks_timeout: 0,
            tasks_cancelled: 0,
            queue_depth: 1,
            active_tasks: 2,
            ws_clients: 4,
            integrations_running: 1,
            audit_entries: 99,
            http_requests_total: 250,
        }
    }

    #[test]
    fn test_prometheus_exposition_shape() {
        let text = prometheus_text(&sample());
        assert!(text.contains("# TYPE warden_uptime_seconds gauge"));
        assert!(text.contains("warden_tasks_completed_total 3"));
        assert!(text.contains("warden_ws_clients 4"));
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn test_snapshot_equality_gates_broadcast() {
        // The WS broadcaster compares snapshots to skip no-change sends;
        // uptime is excluded from that comparison by the hub, so equal
        // payloads must compare equal here.
        let a = sample();
        let b = sample();
        assert_eq!(a, b);
    }
}
