//! System handlers: ping, methods.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use switchboard_rpc::RpcError;
use tracing::instrument;

use crate::rpc::context::RpcContext;
use crate::rpc::registry::MethodHandler;
use crate::rpc::validation::{MAX_PARAM_LENGTH, optional_u64_param, parse_params, validate_string_param};

/// Returns a pong with the current server timestamp.
///
/// An optional `seq` integer is echoed back so clients can match pings to
/// pongs when measuring round trips.
pub struct PingHandler;

#[async_trait]
impl MethodHandler for PingHandler {
    #[instrument(skip_all, fields(method = "system.ping"))]
    async fn handle(&self, params: Option<Value>, _ctx: &RpcContext) -> Result<Value, RpcError> {
        let seq = optional_u64_param(params.as_ref(), "seq")?;
        let mut pong = json!({
            "pong": true,
            "timestamp": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        });
        if let Some(seq) = seq {
            pong["seq"] = json!(seq);
        }
        Ok(pong)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MethodsParams {
    prefix: Option<String>,
}

/// Lists the methods this server answers, optionally only those starting
/// with `prefix`.
pub struct MethodsHandler;

#[async_trait]
impl MethodHandler for MethodsHandler {
    #[instrument(skip_all, fields(method = "system.methods"))]
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        let MethodsParams { prefix } = parse_params(params)?;
        let mut methods = ctx.runtime.registry().methods();
        if let Some(prefix) = prefix {
            validate_string_param(&prefix, "prefix", MAX_PARAM_LENGTH)?;
            methods.retain(|m| m.starts_with(&prefix));
        }
        Ok(json!({ "methods": methods }))
    }
}
