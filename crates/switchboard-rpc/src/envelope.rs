//! RPC message shapes exchanged over a tenant channel.
//!
//! The same shapes flow in both directions: a client sends requests that the
//! server dispatches, and the server sends requests that the client answers.
//! Correlation relies solely on the `id`, which the responder echoes verbatim.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use switchboard_core::CallId;

/// Value of the `jsonrpc` member on every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// Request identifier. Clients may use integers; server-issued ids are strings.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Integer id.
    Number(i64),
    /// String id.
    String(String),
}

impl RequestId {
    /// String form, if this is a string id.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            Self::Number(_) => None,
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<CallId> for RequestId {
    fn from(id: CallId) -> Self {
        Self::String(id.into_inner())
    }
}

/// A request to invoke `method` on the other side of the channel.
///
/// The `jsonrpc` member is added and checked by [`crate::codec`].
#[derive(Clone, Debug, PartialEq)]
pub struct RpcRequest {
    /// Caller-generated identifier, unique while the call is pending.
    pub id: RequestId,
    /// Method name (e.g. `ui.getContext`).
    pub method: String,
    /// Optional parameters; shape is defined per method.
    pub params: Option<Value>,
}

/// Successful reply to a request.
#[derive(Clone, Debug, PartialEq)]
pub struct RpcResponse {
    /// Echoed request identifier.
    pub id: RequestId,
    /// Result payload.
    pub result: Value,
}

/// Structured error carried by an error reply.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorBody {
    /// Numeric error code (see [`crate::errors`]).
    pub code: i64,
    /// Human-readable message. Never contains stack traces.
    pub message: String,
    /// Optional structured details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Error reply to a request.
#[derive(Clone, Debug, PartialEq)]
pub struct RpcErrorResponse {
    /// Echoed request identifier.
    pub id: RequestId,
    /// Error payload.
    pub error: RpcErrorBody,
}

/// Any message that can travel over a channel.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// Invoke a method on the receiver.
    Request(RpcRequest),
    /// Successful reply.
    Response(RpcResponse),
    /// Failed reply.
    Error(RpcErrorResponse),
}

impl Message {
    /// Build a request.
    pub fn request(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Request(RpcRequest {
            id: id.into(),
            method: method.into(),
            params,
        })
    }

    /// Build a success reply.
    pub fn success(id: RequestId, result: Value) -> Self {
        Self::Response(RpcResponse { id, result })
    }

    /// Build an error reply.
    pub fn error(id: RequestId, code: i64, message: impl Into<String>) -> Self {
        Self::Error(RpcErrorResponse {
            id,
            error: RpcErrorBody {
                code,
                message: message.into(),
                data: None,
            },
        })
    }

    /// Build an error reply from a prepared body.
    pub fn error_body(id: RequestId, error: RpcErrorBody) -> Self {
        Self::Error(RpcErrorResponse { id, error })
    }

    /// The correlation id of this message.
    pub fn id(&self) -> &RequestId {
        match self {
            Self::Request(r) => &r.id,
            Self::Response(r) => &r.id,
            Self::Error(r) => &r.id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_id_untagged_serde() {
        let n: RequestId = serde_json::from_str("7").unwrap();
        assert_eq!(n, RequestId::Number(7));
        let s: RequestId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(s, RequestId::String("abc".into()));
        assert_eq!(serde_json::to_string(&n).unwrap(), "7");
    }

    #[test]
    fn request_id_display() {
        assert_eq!(RequestId::Number(42).to_string(), "42");
        assert_eq!(RequestId::from("req_1").to_string(), "req_1");
    }

    #[test]
    fn request_id_from_call_id() {
        let call = CallId::from("call-1");
        let id = RequestId::from(call);
        assert_eq!(id.as_str(), Some("call-1"));
    }

    #[test]
    fn message_id_for_each_variant() {
        let req = Message::request("a", "m", None);
        let ok = Message::success(RequestId::from("b"), json!(1));
        let err = Message::error(RequestId::from("c"), -32603, "boom");
        assert_eq!(req.id(), &RequestId::from("a"));
        assert_eq!(ok.id(), &RequestId::from("b"));
        assert_eq!(err.id(), &RequestId::from("c"));
    }

    #[test]
    fn error_body_omits_missing_data() {
        let body = RpcErrorBody {
            code: -32601,
            message: "nope".into(),
            data: None,
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(!json.contains("data"));
    }
}
