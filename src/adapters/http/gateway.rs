//! Gateway assembly: router, security headers, private-ingress guard,
//! CORS, and the serve loop (plain TCP, TLS, or mTLS).

use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::TlsConfig;
use crate::domain::ports::AuthProvider;

use super::state::AppState;
use super::{audit, security, swarms, system, tasks};

/// The assembled HTTP/WS front-end.
pub struct Gateway {
    state: AppState,
}

impl Gateway {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Build the full route tree with middleware.
    pub fn build_router(&self) -> Router {
        let mut router = Router::new()
            .route("/health", get(system::health))
            .route("/metrics", get(system::metrics))
            .route("/api/v1/tasks", post(tasks::create).get(tasks::list))
            .route(
                "/api/v1/tasks/{id}",
                get(tasks::get).put(tasks::update).delete(tasks::delete),
            )
            .route("/api/v1/tasks/{id}/cancel", post(tasks::cancel))
            .route("/api/v1/swarms/templates", get(swarms::list_templates))
            .route("/api/v1/swarms/execute", post(swarms::execute))
            .route("/api/v1/swarms/estimate", post(swarms::estimate))
            .route("/api/v1/swarms/runs", get(swarms::list_runs))
            .route("/api/v1/swarms/runs/{id}", get(swarms::get_run))
            .route("/api/v1/swarms/runs/{id}/cancel", post(swarms::cancel_run))
            .route("/api/v1/audit", get(audit::query))
            .route("/api/v1/audit/verify", post(audit::verify))
            .route("/api/v1/audit/stats", get(audit::stats))
            .route("/api/v1/audit/export", get(audit::export))
            .route("/api/v1/audit/retention", post(audit::retention))
            .route("/api/v1/security/events", get(security::events))
            .route("/ws/metrics", get(ws_upgrade))
            .with_state(self.state.clone())
            .layer(middleware::from_fn_with_state(
                self.state.clone(),
                security_headers,
            ))
            .layer(middleware::from_fn(private_ingress_guard))
            .layer(TraceLayer::new_for_http());

        if let Some(cors) = cors_layer(&self.state.config.cors_origins, self.state.config.cors_allow_credentials) {
            router = router.layer(cors);
        }

        router
    }

    /// Bind and serve until `shutdown` resolves.
    pub async fn serve<F>(self, shutdown: F) -> DomainResult<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let host = self.state.config.host.clone();
        let port = self.state.config.port;
        let addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .map_err(|e| DomainError::Config(format!("gateway.host: invalid address: {e}")))?;

        if !ip_is_private(addr.ip()) {
            return Err(DomainError::Config(format!(
                "gateway.host: {} is not a loopback or private address",
                addr.ip()
            )));
        }

        let tls = self.state.config.tls.clone();
        let router = self
            .build_router()
            .into_make_service_with_connect_info::<SocketAddr>();

        if tls.enabled {
            let rustls_config = build_tls_config(&tls).await?;
            tracing::info!(%addr, mtls = tls.ca_path.is_some(), "gateway listening (TLS)");
            let handle = axum_server::Handle::new();
            {
                let handle = handle.clone();
                tokio::spawn(async move {
                    shutdown.await;
                    handle.graceful_shutdown(Some(std::time::Duration::from_secs(5)));
                });
            }
            axum_server::bind_rustls(addr, rustls_config)
                .handle(handle)
                .serve(router)
                .await
                .map_err(|e| DomainError::DependencyUnavailable(format!("gateway: {e}")))?;
        } else {
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .map_err(|e| DomainError::DependencyUnavailable(format!("gateway bind: {e}")))?;
            tracing::info!(%addr, "gateway listening");
            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await
                .map_err(|e| DomainError::DependencyUnavailable(format!("gateway: {e}")))?;
        }

        Ok(())
    }
}

/// WebSocket upgrade: authenticate via `?token=` and hand the socket to
/// the hub. Auth failures still upgrade, then close with 4401.
async fn ws_upgrade(
    websocket: axum::extract::WebSocketUpgrade,
    axum::extract::Query(params): axum::extract::Query<WsParams>,
    State(state): State<AppState>,
) -> Response {
    let principal = match params.token {
        Some(token) => state.auth.authenticate(&token).await.ok().flatten(),
        None => None,
    };
    let hub = Arc::clone(&state.hub);
    websocket.on_upgrade(move |socket| hub.handle_socket(socket, principal))
}

#[derive(serde::Deserialize)]
struct WsParams {
    token: Option<String>,
}

/// Security headers on every response; HSTS only under TLS.
async fn security_headers(
    State(state): State<AppState>,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    state.metrics.record_http_request();
    let tls = state.config.tls.enabled;
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("no-referrer"),
    );
    headers.insert(
        header::HeaderName::from_static("permissions-policy"),
        HeaderValue::from_static("camera=(), microphone=(), geolocation=()"),
    );
    if tls {
        headers.insert(
            header::STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static("max-age=63072000; includeSubDomains"),
        );
    }
    response
}

/// Reject clients outside loopback/private ranges at ingress.
async fn private_ingress_guard(
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: axum::extract::Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if let Some(ConnectInfo(peer)) = connect_info {
        if !ip_is_private(peer.ip()) {
            tracing::warn!(peer = %peer, "rejected non-private client at ingress");
            return Err(StatusCode::FORBIDDEN);
        }
    }
    Ok(next.run(request).await)
}

/// Loopback plus RFC 1918 / unique-local ranges.
pub fn ip_is_private(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 unique-local
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                // fe80::/10 link-local
                || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}

/// TLS material from config. `ca_path` switches on mTLS: client
/// certificates are then required and verified against that root.
async fn build_tls_config(
    tls: &TlsConfig,
) -> DomainResult<axum_server::tls_rustls::RustlsConfig> {
    use axum_server::tls_rustls::RustlsConfig;

    let cert_path = tls.cert_path.as_deref().ok_or_else(|| {
        DomainError::Config("gateway.tls.cert_path: required when tls is enabled".into())
    })?;
    let key_path = tls.key_path.as_deref().ok_or_else(|| {
        DomainError::Config("gateway.tls.key_path: required when tls is enabled".into())
    })?;

    let Some(ca_path) = tls.ca_path.as_deref() else {
        return RustlsConfig::from_pem_file(cert_path, key_path)
            .await
            .map_err(|e| DomainError::Config(format!("gateway.tls: {e}")));
    };

    let certs = read_certs(cert_path)?;
    let key = read_key(key_path)?;

    let mut roots = rustls::RootCertStore::empty();
    for ca_cert in read_certs(ca_path)? {
        roots
            .add(ca_cert)
            .map_err(|e| DomainError::Config(format!("gateway.tls.ca_path: {e}")))?;
    }
    let verifier = rustls::server::WebPkiClientVerifier::builder(Arc::new(roots))
        .build()
        .map_err(|e| DomainError::Config(format!("gateway.tls.ca_path: {e}")))?;

    let server_config = rustls::ServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_single_cert(certs, key)
        .map_err(|e| DomainError::Config(format!("gateway.tls: {e}")))?;

    Ok(RustlsConfig::from_config(Arc::new(server_config)))
}

fn read_certs(path: &str) -> DomainResult<Vec<rustls::pki_types::CertificateDer<'static>>> {
    let data = std::fs::read(path)
        .map_err(|e| DomainError::Config(format!("gateway.tls: cannot read {path}: {e}")))?;
    rustls_pemfile::certs(&mut data.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| DomainError::Config(format!("gateway.tls: bad PEM in {path}: {e}")))
}

fn read_key(path: &str) -> DomainResult<rustls::pki_types::PrivateKeyDer<'static>> {
    let data = std::fs::read(path)
        .map_err(|e| DomainError::Config(format!("gateway.tls: cannot read {path}: {e}")))?;
    rustls_pemfile::private_key(&mut data.as_slice())
        .map_err(|e| DomainError::Config(format!("gateway.tls: bad key in {path}: {e}")))?
        .ok_or_else(|| DomainError::Config(format!("gateway.tls: no private key in {path}")))
}

/// CORS from the configured allow-list. Wildcard origins never pair with
/// credentials.
fn cors_layer(origins: &[String], allow_credentials: bool) -> Option<CorsLayer> {
    if origins.is_empty() {
        return None;
    }

    let wildcard = origins.iter().any(|o| o == "*");
    let mut layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    if wildcard {
        layer = layer.allow_origin(Any);
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| HeaderValue::from_str(origin).ok())
            .collect();
        layer = layer.allow_origin(AllowOrigin::list(parsed));
        if allow_credentials {
            layer = layer.allow_credentials(true);
        }
    }

    Some(layer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_private_ip_classification() {
        assert!(ip_is_private("127.0.0.1".parse().unwrap()));
        assert!(ip_is_private("10.1.2.3".parse().unwrap()));
        assert!(ip_is_private("192.168.0.10".parse().unwrap()));
        assert!(ip_is_private("172.16.5.5".parse().unwrap()));
        assert!(ip_is_private("::1".parse().unwrap()));
        assert!(ip_is_private("fc00::1".parse().unwrap()));

        assert!(!ip_is_private("8.8.8.8".parse().unwrap()));
        assert!(!ip_is_private("203.0.113.9".parse().unwrap()));
        assert!(!ip_is_private("2001:4860:4860::8888".parse().unwrap()));
    }

    #[test]
    fn test_cors_wildcard_never_credentialed() {
        // Wildcard + credentials must not panic tower-http's invariant:
        // the layer is built without credentials in that case
        let layer = cors_layer(&["*".to_string()], true);
        assert!(layer.is_some());

        let layer = cors_layer(&[], true);
        assert!(layer.is_none());
    }
}
