//! `SwitchboardServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use switchboard_core::TenantId;
use switchboard_rpc::RpcErrorBody;
use switchboard_rpc::errors::INVALID_REQUEST;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::api;
use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::metrics::WS_REJECTED_TOTAL;
use crate::runtime::RpcRuntime;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::session::{SessionConfig, run_ws_session};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// The RPC runtime.
    pub runtime: Arc<RpcRuntime>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    /// Open WebSocket sessions.
    pub active_sessions: Arc<AtomicUsize>,
}

/// The switchboard server.
pub struct SwitchboardServer {
    config: Arc<ServerConfig>,
    runtime: Arc<RpcRuntime>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
    active_sessions: Arc<AtomicUsize>,
}

impl SwitchboardServer {
    /// Create a server around an existing runtime.
    pub fn new(config: ServerConfig, runtime: Arc<RpcRuntime>) -> Self {
        Self {
            config: Arc::new(config),
            runtime,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics: None,
            active_sessions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            runtime: Arc::clone(&self.runtime),
            config: Arc::clone(&self.config),
            shutdown: Arc::clone(&self.shutdown),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
            active_sessions: Arc::clone(&self.active_sessions),
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/ws", get(ws_handler))
            .route(
                "/api/tenants/{tenant_id}/presence",
                get(api::presence_handler),
            )
            .route("/api/tenants/{tenant_id}/calls", post(api::call_handler))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Bind and serve in a background task.
    ///
    /// Returns the bound address (useful with port 0) and the serve task,
    /// which finishes after the shutdown token fires and open connections
    /// drain.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(error = %e, "server error");
            }
        });

        info!(%local_addr, "switchboard listening");
        Ok((local_addr, handle))
    }

    /// Start the abandoned-call reaper, stopped by the shutdown token.
    pub fn spawn_reaper(&self) -> JoinHandle<()> {
        self.runtime
            .spawn_reaper(self.config.reaper_interval, self.shutdown.token())
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The RPC runtime.
    pub fn runtime(&self) -> &Arc<RpcRuntime> {
        &self.runtime
    }

    /// Open WebSocket sessions.
    pub fn active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::Relaxed)
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.shutdown.is_shutting_down(),
        state.runtime.connections().local_count(),
        state.runtime.calls().pending_count(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

/// Decrements the session count when the upgrade completes or is abandoned.
struct SessionSlot(Arc<AtomicUsize>);

impl Drop for SessionSlot {
    fn drop(&mut self) {
        let _ = self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// GET /ws
async fn ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if state.shutdown.is_shutting_down() {
        return reject(StatusCode::SERVICE_UNAVAILABLE, "shutting_down", "server is shutting down");
    }

    let Some(tenant_id) = tenant_from_headers(&headers, &state.config.tenant_header) else {
        return reject(StatusCode::UNAUTHORIZED, "missing_tenant", "missing tenant identity");
    };

    let previous = state.active_sessions.fetch_add(1, Ordering::AcqRel);
    let slot = SessionSlot(Arc::clone(&state.active_sessions));
    if previous >= state.config.max_connections {
        warn!(%tenant_id, max = state.config.max_connections, "connection limit reached");
        return reject(StatusCode::SERVICE_UNAVAILABLE, "capacity", "too many connections");
    }

    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };

    let runtime = Arc::clone(&state.runtime);
    let session_config = SessionConfig::from(state.config.as_ref());
    let token = state.shutdown.token();
    upgrade
        .max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| async move {
            let _slot = slot;
            run_ws_session(socket, tenant_id, runtime, session_config, token).await;
        })
}

/// Tenant id from the configured header; missing, non-ASCII or blank is `None`.
fn tenant_from_headers(headers: &HeaderMap, header: &str) -> Option<TenantId> {
    headers
        .get(header)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(TenantId::from)
}

fn reject(status: StatusCode, reason: &'static str, message: &str) -> Response {
    counter!(WS_REJECTED_TOTAL, "reason" => reason).increment(1);
    api::error_response(
        status,
        RpcErrorBody {
            code: INVALID_REQUEST,
            message: message.to_owned(),
            data: None,
        },
    )
}
