//! WebSocket pub/sub hub (`/ws/metrics`).
//!
//! Clients authenticate via `?token=` (the handshake has no header
//! injection path), subscribe to channels gated by RBAC, and receive
//! ordered `update` frames. A heartbeat evicts silent clients; the
//! periodic metrics broadcast is change-gated.

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, RwLock};
use uuid::Uuid;

use crate::domain::models::PermissionCheck;
use crate::domain::ports::Principal;
use crate::services::audit_chain::AuditChain;
use crate::services::metrics::MetricsService;
use crate::services::rbac::RbacService;
use crate::services::task_executor::TaskExecutor;

/// Close code sent when the handshake token does not authenticate.
const CLOSE_UNAUTHORIZED: u16 = 4401;
/// Close code for orderly shutdown.
const CLOSE_NORMAL: u16 = 1000;

/// Channels and the permission each one requires.
const CHANNELS: &[(&str, &str, &str)] = &[
    ("metrics", "metrics", "read"),
    ("audit", "audit", "read"),
    ("tasks", "tasks", "read"),
    ("security", "security_events", "read"),
];

fn channel_permission(channel: &str) -> Option<(&'static str, &'static str)> {
    CHANNELS
        .iter()
        .find(|(name, _, _)| *name == channel)
        .map(|(_, resource, action)| (*resource, *action))
}

/// Client -> server frames.
#[derive(Debug, Deserialize)]
struct ClientFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: ChannelsPayload,
}

#[derive(Debug, Default, Deserialize)]
struct ChannelsPayload {
    #[serde(default)]
    channels: Vec<String>,
}

/// Server -> client frames.
#[derive(Serialize)]
struct ServerFrame<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    channel: &'a str,
    payload: serde_json::Value,
    timestamp: String,
    sequence: u64,
}

struct ClientHandle {
    tx: mpsc::UnboundedSender<Message>,
    channels: HashSet<String>,
    user_id: String,
    role: String,
    last_pong: Instant,
}

/// The hub: registry of connected clients plus the periodic daemons.
pub struct WsHub {
    clients: RwLock<HashMap<Uuid, ClientHandle>>,
    sequence: AtomicU64,
    rbac: Arc<RbacService>,
    metrics: Arc<MetricsService>,
    heartbeat_interval: Duration,
    broadcast_interval: Duration,
    shutdown_tx: watch::Sender<bool>,
}

impl WsHub {
    pub fn new(
        rbac: Arc<RbacService>,
        metrics: Arc<MetricsService>,
        heartbeat_interval_ms: u64,
        metrics_broadcast_ms: u64,
    ) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            clients: RwLock::new(HashMap::new()),
            sequence: AtomicU64::new(0),
            rbac,
            metrics,
            heartbeat_interval: Duration::from_millis(heartbeat_interval_ms),
            broadcast_interval: Duration::from_millis(metrics_broadcast_ms),
            shutdown_tx,
        })
    }

    pub async fn subscriber_count(&self, channel: &str) -> usize {
        self.clients
            .read()
            .await
            .values()
            .filter(|c| c.channels.contains(channel))
            .count()
    }

    /// Fan an update out to every open subscriber of `channel`.
    /// Per-client failures are logged and do not abort the fanout.
    pub async fn broadcast(&self, channel: &str, payload: serde_json::Value) {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let frame = ServerFrame {
            kind: "update",
            channel,
            payload,
            timestamp: chrono::Utc::now().to_rfc3339(),
            sequence,
        };
        let Ok(text) = serde_json::to_string(&frame) else {
            return;
        };

        let clients = self.clients.read().await;
        for (id, client) in clients.iter() {
            if !client.channels.contains(channel) {
                continue;
            }
            if let Err(err) = client.tx.send(Message::Text(text.clone().into())) {
                tracing::debug!(client_id = %id, error = %err, "ws send failed during fanout");
            }
        }
    }

    /// Drive one accepted socket. `principal` is `None` when the
    /// handshake token did not authenticate; the socket is then closed
    /// with 4401 immediately after the upgrade.
    pub async fn handle_socket(self: Arc<Self>, mut socket: WebSocket, principal: Option<Principal>) {
        let Some(principal) = principal else {
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: CLOSE_UNAUTHORIZED,
                    reason: "authentication failed".into(),
                })))
                .await;
            return;
        };

        let client_id = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        self.clients.write().await.insert(
            client_id,
            ClientHandle {
                tx,
                channels: HashSet::new(),
                user_id: principal.user_id.clone(),
                role: principal.role.clone(),
                last_pong: Instant::now(),
            },
        );
        self.metrics.ws_client_connected();
        tracing::debug!(client_id = %client_id, user = %principal.user_id, "ws client connected");

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                outbound = rx.recv() => {
                    match outbound {
                        Some(message) => {
                            let closing = matches!(message, Message::Close(_));
                            if socket.send(message).await.is_err() || closing {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                inbound = socket.recv() => {
                    match inbound {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_client_frame(client_id, text.as_str()).await;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            if let Some(client) =
                                self.clients.write().await.get_mut(&client_id)
                            {
                                client.last_pong = Instant::now();
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if socket.send(Message::Pong(data)).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            tracing::debug!(client_id = %client_id, error = %err, "ws receive error");
                            break;
                        }
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        let _ = socket
                            .send(Message::Close(Some(CloseFrame {
                                code: CLOSE_NORMAL,
                                reason: "server shutting down".into(),
                            })))
                            .await;
                        break;
                    }
                }
            }
        }

        self.clients.write().await.remove(&client_id);
        self.metrics.ws_client_disconnected();
        tracing::debug!(client_id = %client_id, "ws client disconnected");
    }

    /// Apply a subscribe/unsubscribe frame. Channels the role cannot read
    /// are silently dropped and never acknowledged.
    async fn handle_client_frame(&self, client_id: Uuid, text: &str) {
        let Ok(frame) = serde_json::from_str::<ClientFrame>(text) else {
            tracing::debug!(client_id = %client_id, "ignoring malformed ws frame");
            return;
        };

        match frame.kind.as_str() {
            "subscribe" => {
                let (user_id, role) = {
                    let clients = self.clients.read().await;
                    let Some(client) = clients.get(&client_id) else {
                        return;
                    };
                    (client.user_id.clone(), client.role.clone())
                };

                let mut granted = Vec::new();
                for channel in &frame.payload.channels {
                    let Some((resource, action)) = channel_permission(channel) else {
                        continue;
                    };
                    let decision = self
                        .rbac
                        .check_permission(
                            &role,
                            &PermissionCheck::new(resource, action),
                            Some(&user_id),
                        )
                        .await;
                    if decision.granted {
                        granted.push(channel.clone());
                    }
                }

                let mut clients = self.clients.write().await;
                let Some(client) = clients.get_mut(&client_id) else {
                    return;
                };
                for channel in &granted {
                    client.channels.insert(channel.clone());
                }
                let ack = ServerFrame {
                    kind: "ack",
                    channel: "system",
                    payload: serde_json::json!({ "subscribed": granted }),
                    timestamp: chrono::Utc::now().to_rfc3339(),
                    sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
                };
                if let Ok(text) = serde_json::to_string(&ack) {
                    let _ = client.tx.send(Message::Text(text.into()));
                }
            }
            "unsubscribe" => {
                let mut clients = self.clients.write().await;
                if let Some(client) = clients.get_mut(&client_id) {
                    for channel in &frame.payload.channels {
                        client.channels.remove(channel);
                    }
                }
            }
            other => {
                tracing::debug!(client_id = %client_id, kind = other, "unknown ws frame type");
            }
        }
    }

    /// Ping every client periodically; terminate those silent past twice
    /// the heartbeat interval.
    pub fn spawn_heartbeat(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let interval = self.heartbeat_interval;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(hub) = weak.upgrade() else { break };
                        hub.heartbeat_pass(interval * 2).await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }

    async fn heartbeat_pass(&self, max_silence: Duration) {
        let now = Instant::now();
        let mut stale = Vec::new();
        {
            let clients = self.clients.read().await;
            for (id, client) in clients.iter() {
                if now.duration_since(client.last_pong) > max_silence {
                    stale.push(*id);
                } else {
                    let _ = client.tx.send(Message::Ping(Bytes::new()));
                }
            }
        }

        if stale.is_empty() {
            return;
        }
        let mut clients = self.clients.write().await;
        for id in stale {
            if let Some(client) = clients.remove(&id) {
                tracing::info!(client_id = %id, "evicting silent ws client");
                let _ = client.tx.send(Message::Close(Some(CloseFrame {
                    code: CLOSE_NORMAL,
                    reason: "heartbeat timeout".into(),
                })));
                self.metrics.ws_client_disconnected();
            }
        }
    }

    /// Periodic metrics broadcast: skipped without subscribers and when
    /// the payload (minus uptime) has not changed since the last send.
    pub fn spawn_metrics_broadcaster(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let interval = self.broadcast_interval;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            let mut last_payload: Option<serde_json::Value> = None;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(hub) = weak.upgrade() else { break };
                        if hub.subscriber_count("metrics").await == 0 {
                            continue;
                        }
                        let snapshot = match hub.metrics.snapshot().await {
                            Ok(snapshot) => snapshot,
                            Err(err) => {
                                tracing::warn!(error = %err, "metrics snapshot failed");
                                continue;
                            }
                        };
                        let Ok(mut payload) = serde_json::to_value(&snapshot) else {
                            continue;
                        };
                        // Uptime always moves; gate on the rest
                        let gate = {
                            let mut gate = payload.clone();
                            if let Some(obj) = gate.as_object_mut() {
                                obj.remove("uptime_secs");
                            }
                            gate
                        };
                        if last_payload.as_ref() == Some(&gate) {
                            continue;
                        }
                        last_payload = Some(gate);
                        if let Some(obj) = payload.as_object_mut() {
                            obj.insert(
                                "uptime_secs".into(),
                                serde_json::Value::from(snapshot.uptime_secs),
                            );
                        }
                        hub.broadcast("metrics", payload).await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Bridge task and audit events onto their channels.
    pub fn spawn_event_bridges(
        self: &Arc<Self>,
        executor: &Arc<TaskExecutor>,
        audit: &Arc<AuditChain>,
    ) {
        {
            let weak = Arc::downgrade(self);
            let mut events = executor.subscribe();
            tokio::spawn(async move {
                loop {
                    match events.recv().await {
                        Ok(event) => {
                            let Some(hub) = weak.upgrade() else { break };
                            if let Ok(payload) = serde_json::to_value(&event.task) {
                                hub.broadcast("tasks", payload).await;
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                            tracing::warn!(missed, "task event bridge lagged");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            });
        }
        {
            let weak = Arc::downgrade(self);
            let mut entries = audit.subscribe();
            tokio::spawn(async move {
                loop {
                    match entries.recv().await {
                        Ok(entry) => {
                            let Some(hub) = weak.upgrade() else { break };
                            let Ok(payload) = serde_json::to_value(&entry) else {
                                continue;
                            };
                            hub.broadcast("audit", payload.clone()).await;
                            if let Some(kind) = entry.event.security_kind() {
                                let mut security = payload;
                                if let Some(obj) = security.as_object_mut() {
                                    obj.insert(
                                        "security_type".into(),
                                        serde_json::Value::String(kind.into()),
                                    );
                                }
                                hub.broadcast("security", security).await;
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                            tracing::warn!(missed, "audit event bridge lagged");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            });
        }
    }

    /// Close every client with 1000 and stop the daemons. Idempotent.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_permissions() {
        assert_eq!(channel_permission("metrics"), Some(("metrics", "read")));
        assert_eq!(
            channel_permission("security"),
            Some(("security_events", "read"))
        );
        assert_eq!(channel_permission("bogus"), None);
    }

    #[test]
    fn test_client_frame_parsing() {
        let frame: ClientFrame = serde_json::from_str(
            r#"{"type": "subscribe", "payload": {"channels": ["metrics", "tasks"]}}"#,
        )
        .unwrap();
        assert_eq!(frame.kind, "subscribe");
        assert_eq!(frame.payload.channels, vec!["metrics", "tasks"]);

        // Payload is optional on the wire
        let bare: ClientFrame = serde_json::from_str(r#"{"type": "unsubscribe"}"#).unwrap();
        assert!(bare.payload.channels.is_empty());
    }
}
