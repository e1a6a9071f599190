//! Parameter helpers for handlers.
//!
//! Params are untyped at the wire boundary; handlers validate what they need
//! and fail with [`RpcError::InvalidParams`].

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use switchboard_rpc::RpcError;

/// Maximum general string parameter length (8 KB).
pub const MAX_PARAM_LENGTH: usize = 8_192;

/// Fetch a required parameter.
pub fn require_param<'a>(params: Option<&'a Value>, key: &str) -> Result<&'a Value, RpcError> {
    params
        .and_then(|p| p.get(key))
        .filter(|v| !v.is_null())
        .ok_or_else(|| RpcError::invalid_params(format!("Missing required parameter: {key}")))
}

/// Fetch a required string parameter.
pub fn require_string_param(params: Option<&Value>, key: &str) -> Result<String, RpcError> {
    let value = require_param(params, key)?
        .as_str()
        .ok_or_else(|| RpcError::invalid_params(format!("Parameter '{key}' must be a string")))?;
    validate_string_param(value, key, MAX_PARAM_LENGTH)?;
    Ok(value.to_owned())
}

/// Fetch an optional unsigned integer parameter.
pub fn optional_u64_param(params: Option<&Value>, key: &str) -> Result<Option<u64>, RpcError> {
    match params.and_then(|p| p.get(key)) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v.as_u64().map(Some).ok_or_else(|| {
            RpcError::invalid_params(format!("Parameter '{key}' must be a non-negative integer"))
        }),
    }
}

/// Deserialize the whole params value into `T`.
///
/// Absent params deserialize as an empty object, so a `T` whose fields all
/// have defaults accepts a bare request.
pub fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, RpcError> {
    serde_json::from_value(params.unwrap_or_else(|| Value::Object(Map::new())))
        .map_err(|e| RpcError::invalid_params(format!("Invalid params: {e}")))
}

/// Reject strings longer than `max_len` bytes.
pub fn validate_string_param(value: &str, name: &str, max_len: usize) -> Result<(), RpcError> {
    if value.len() > max_len {
        return Err(RpcError::invalid_params(format!(
            "Parameter '{name}' exceeds maximum length ({} > {max_len})",
            value.len()
        )));
    }
    Ok(())
}
