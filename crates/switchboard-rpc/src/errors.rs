//! RPC error codes and the handler error type.

use serde_json::Value;

use crate::envelope::RpcErrorBody;

// ── Error code constants ────────────────────────────────────────────

/// Payload was not valid JSON.
pub const PARSE_ERROR: i64 = -32700;
/// Payload was JSON but not a valid envelope.
pub const INVALID_REQUEST: i64 = -32600;
/// Method not found in the registry.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Invalid or missing parameters.
pub const INVALID_PARAMS: i64 = -32602;
/// Unexpected failure inside a handler.
pub const INTERNAL_ERROR: i64 = -32603;
/// Outbound call deadline exceeded.
pub const TIMEOUT_ERROR: i64 = -32000;
/// Tenant has no reachable channel.
pub const NO_ACTIVE_CONNECTION: i64 = -32001;

/// Message sent to clients in place of internal failure details.
pub const SANITIZED_INTERNAL_MESSAGE: &str = "Internal error";

/// Stable label for a wire code, used for log fields and metric labels.
pub fn code_name(code: i64) -> &'static str {
    match code {
        PARSE_ERROR => "parse_error",
        INVALID_REQUEST => "invalid_request",
        METHOD_NOT_FOUND => "method_not_found",
        INVALID_PARAMS => "invalid_params",
        INTERNAL_ERROR => "internal_error",
        TIMEOUT_ERROR => "timeout",
        NO_ACTIVE_CONNECTION => "no_active_connection",
        _ => "application_error",
    }
}

/// Error type returned by method handlers.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// Required parameter missing or wrong type.
    #[error("{message}")]
    InvalidParams {
        /// Description of what is wrong.
        message: String,
    },

    /// Unexpected failure. The message is logged, never sent.
    #[error("{message}")]
    Internal {
        /// Description.
        message: String,
    },

    /// Domain-specific error with arbitrary code.
    #[error("{message}")]
    Custom {
        /// Numeric code.
        code: i64,
        /// Human-readable message.
        message: String,
        /// Optional structured details.
        data: Option<Value>,
    },
}

impl RpcError {
    /// Shorthand for [`RpcError::InvalidParams`].
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams {
            message: message.into(),
        }
    }

    /// Shorthand for [`RpcError::Internal`].
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Wire code for this variant.
    pub fn code(&self) -> i64 {
        match self {
            Self::InvalidParams { .. } => INVALID_PARAMS,
            Self::Internal { .. } => INTERNAL_ERROR,
            Self::Custom { code, .. } => *code,
        }
    }

    /// Convert to the wire-format error body.
    ///
    /// Internal failures are reduced to [`SANITIZED_INTERNAL_MESSAGE`].
    pub fn to_error_body(&self) -> RpcErrorBody {
        match self {
            Self::InvalidParams { message } => RpcErrorBody {
                code: INVALID_PARAMS,
                message: message.clone(),
                data: None,
            },
            Self::Internal { .. } => RpcErrorBody {
                code: INTERNAL_ERROR,
                message: SANITIZED_INTERNAL_MESSAGE.to_owned(),
                data: None,
            },
            Self::Custom {
                code,
                message,
                data,
            } => RpcErrorBody {
                code: *code,
                message: message.clone(),
                data: data.clone(),
            },
        }
    }
}
