//! Tenant HTTP API: presence lookup and server-initiated calls.

use std::time::Duration;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use switchboard_core::TenantId;
use switchboard_rpc::RpcErrorBody;
use switchboard_rpc::errors::{INTERNAL_ERROR, INVALID_PARAMS};
use tracing::warn;

use crate::calls::CallError;
use crate::server::AppState;

/// Longest timeout a caller may request over HTTP.
pub const MAX_CALL_TIMEOUT: Duration = Duration::from_secs(300);

/// Body of `POST /api/tenants/{tenant_id}/calls`.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRequest {
    /// Method to invoke on the tenant.
    pub method: String,
    /// Parameters passed through untouched.
    #[serde(default)]
    pub params: Option<Value>,
    /// Per-call timeout; the server default when absent.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// `GET /api/tenants/{tenant_id}/presence`
pub async fn presence_handler(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> Response {
    let tenant_id = TenantId::from(tenant_id);
    match state.runtime.connections().presence(&tenant_id).await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => {
            warn!(%tenant_id, error = %e, "presence lookup failed");
            error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                body(INTERNAL_ERROR, "presence store unavailable"),
            )
        }
    }
}

/// `POST /api/tenants/{tenant_id}/calls`
pub async fn call_handler(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(request): Json<CallRequest>,
) -> Response {
    if request.method.trim().is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            body(INVALID_PARAMS, "method must not be empty"),
        );
    }
    let timeout = request
        .timeout_ms
        .map_or(state.config.default_call_timeout, Duration::from_millis);
    if timeout.is_zero() || timeout > MAX_CALL_TIMEOUT {
        return error_response(
            StatusCode::BAD_REQUEST,
            body(
                INVALID_PARAMS,
                format!("timeoutMs must be between 1 and {}", MAX_CALL_TIMEOUT.as_millis()),
            ),
        );
    }

    let tenant_id = TenantId::from(tenant_id);
    match state
        .runtime
        .call(&tenant_id, &request.method, request.params, timeout)
        .await
    {
        Ok(result) => Json(json!({ "result": result })).into_response(),
        Err(e) => error_response(status_for(&e), e.to_error_body()),
    }
}

/// HTTP status for a failed call.
pub fn status_for(err: &CallError) -> StatusCode {
    match err {
        CallError::NoActiveConnection { .. } | CallError::ChannelClosed { .. } => {
            StatusCode::NOT_FOUND
        }
        CallError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        CallError::Remote { .. } => StatusCode::BAD_GATEWAY,
        CallError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// `{"error": {...}}` with the given status.
pub fn error_response(status: StatusCode, error: RpcErrorBody) -> Response {
    (status, Json(json!({ "error": error }))).into_response()
}

fn body(code: i64, message: impl Into<String>) -> RpcErrorBody {
    RpcErrorBody {
        code,
        message: message.into(),
        data: None,
    }
}
