//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the global Prometheus recorder.
///
/// Returns the handle used to render `/metrics`. Fails if a recorder is
/// already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// Inbound requests (counter, labels: method).
pub const RPC_REQUESTS_TOTAL: &str = "rpc_requests_total";
/// Inbound request failures (counter, labels: method, error_type).
pub const RPC_ERRORS_TOTAL: &str = "rpc_errors_total";
/// Inbound handler latency (histogram, labels: method).
pub const RPC_REQUEST_DURATION_SECONDS: &str = "rpc_request_duration_seconds";
/// Malformed inbound payloads (counter).
pub const RPC_PARSE_ERRORS_TOTAL: &str = "rpc_parse_errors_total";
/// Outbound calls issued (counter, labels: method).
pub const RPC_OUTBOUND_CALLS_TOTAL: &str = "rpc_outbound_calls_total";
/// Outbound call failures (counter, labels: method, error_type).
pub const RPC_OUTBOUND_ERRORS_TOTAL: &str = "rpc_outbound_errors_total";
/// Outbound call latency (histogram, labels: method).
pub const RPC_OUTBOUND_DURATION_SECONDS: &str = "rpc_outbound_duration_seconds";
/// Replies that matched no pending call (counter).
pub const RPC_OUTBOUND_UNMATCHED_TOTAL: &str = "rpc_outbound_unmatched_total";
/// Pending outbound calls (gauge).
pub const RPC_OUTBOUND_PENDING: &str = "rpc_outbound_pending";
/// Presence records corrected on a local-map miss (counter).
pub const PRESENCE_SELF_HEALS_TOTAL: &str = "presence_self_heals_total";
/// Presence store failures (counter, labels: op).
pub const PRESENCE_STORE_ERRORS_TOTAL: &str = "presence_store_errors_total";
/// Channels in the local map (gauge).
pub const PRESENCE_LOCAL_CHANNELS: &str = "presence_local_channels";
/// WebSocket sessions opened (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket sessions closed (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket sessions (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Session lifetime (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Upgrades refused (counter, labels: reason).
pub const WS_REJECTED_TOTAL: &str = "ws_rejected_total";
