//! Text encoding of [`Message`]s.
//!
//! Decoding never panics and never throws away the channel: every malformed
//! input is classified as a [`ParseError`], which the read loop logs and
//! drops. Without a trustworthy id there is nobody to reply to.

use serde_json::{Map, Value};

use crate::envelope::{
    JSONRPC_VERSION, Message, RequestId, RpcErrorBody, RpcErrorResponse, RpcRequest, RpcResponse,
};
use crate::errors;

/// Why an inbound payload could not be decoded.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Payload is not valid JSON.
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    /// Payload is JSON but not an object.
    #[error("message is not a JSON object")]
    NotAnObject,
    /// `jsonrpc` member missing or not `"2.0"`.
    #[error("missing or unsupported jsonrpc version")]
    BadVersion,
    /// `id` missing, null, or neither a string nor an integer.
    #[error("missing or invalid id")]
    InvalidId,
    /// `method` present but not a string.
    #[error("method must be a string")]
    InvalidMethod,
    /// Reply carries both `result` and `error`.
    #[error("reply carries both result and error")]
    AmbiguousReply,
    /// Neither `method`, `result` nor `error` present.
    #[error("message is neither a request nor a reply")]
    UnknownShape,
    /// `error` member is not a valid error object.
    #[error("malformed error object: {0}")]
    InvalidErrorObject(&'static str),
}

impl ParseError {
    /// Wire code this failure maps to.
    pub fn code(&self) -> i64 {
        match self {
            Self::InvalidJson(_) => errors::PARSE_ERROR,
            _ => errors::INVALID_REQUEST,
        }
    }
}

/// Serialize a message to its wire text.
pub fn encode(message: &Message) -> String {
    let mut obj = Map::new();
    let _ = obj.insert("jsonrpc".into(), Value::from(JSONRPC_VERSION));
    let _ = obj.insert("id".into(), id_to_value(message.id()));
    match message {
        Message::Request(req) => {
            let _ = obj.insert("method".into(), Value::from(req.method.as_str()));
            if let Some(params) = &req.params {
                let _ = obj.insert("params".into(), params.clone());
            }
        }
        Message::Response(resp) => {
            let _ = obj.insert("result".into(), resp.result.clone());
        }
        Message::Error(resp) => {
            let _ = obj.insert("error".into(), error_to_value(&resp.error));
        }
    }
    Value::Object(obj).to_string()
}

/// Parse wire text into a message.
pub fn decode(raw: &str) -> Result<Message, ParseError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| ParseError::InvalidJson(e.to_string()))?;
    let Value::Object(mut obj) = value else {
        return Err(ParseError::NotAnObject);
    };

    match obj.get("jsonrpc") {
        Some(Value::String(v)) if v == JSONRPC_VERSION => {}
        _ => return Err(ParseError::BadVersion),
    }

    let id = match obj.remove("id") {
        Some(Value::String(s)) => RequestId::String(s),
        Some(Value::Number(n)) => n.as_i64().map(RequestId::Number).ok_or(ParseError::InvalidId)?,
        _ => return Err(ParseError::InvalidId),
    };

    if let Some(method) = obj.remove("method") {
        let Value::String(method) = method else {
            return Err(ParseError::InvalidMethod);
        };
        return Ok(Message::Request(RpcRequest {
            id,
            method,
            params: obj.remove("params"),
        }));
    }

    match (obj.remove("result"), obj.remove("error")) {
        (Some(result), None) => Ok(Message::Response(RpcResponse { id, result })),
        (None, Some(error)) => Ok(Message::Error(RpcErrorResponse {
            id,
            error: error_from_value(error)?,
        })),
        (Some(_), Some(_)) => Err(ParseError::AmbiguousReply),
        (None, None) => Err(ParseError::UnknownShape),
    }
}

fn id_to_value(id: &RequestId) -> Value {
    match id {
        RequestId::Number(n) => Value::from(*n),
        RequestId::String(s) => Value::from(s.as_str()),
    }
}

fn error_to_value(body: &RpcErrorBody) -> Value {
    let mut obj = Map::new();
    let _ = obj.insert("code".into(), Value::from(body.code));
    let _ = obj.insert("message".into(), Value::from(body.message.as_str()));
    if let Some(data) = &body.data {
        let _ = obj.insert("data".into(), data.clone());
    }
    Value::Object(obj)
}

fn error_from_value(value: Value) -> Result<RpcErrorBody, ParseError> {
    let Value::Object(mut obj) = value else {
        return Err(ParseError::InvalidErrorObject("not an object"));
    };
    let code = obj
        .get("code")
        .and_then(Value::as_i64)
        .ok_or(ParseError::InvalidErrorObject("code must be an integer"))?;
    let message = match obj.remove("message") {
        Some(Value::String(m)) => m,
        _ => return Err(ParseError::InvalidErrorObject("message must be a string")),
    };
    Ok(RpcErrorBody {
        code,
        message,
        data: obj.remove("data"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    // ── Wire format fixtures ────────────────────────────────────────

    #[test]
    fn decode_request() {
        let raw = r#"{"jsonrpc":"2.0","id":"req_1","method":"ui.getContext","params":{"tab":1}}"#;
        let msg = decode(raw).unwrap();
        assert_matches!(msg, Message::Request(req) => {
            assert_eq!(req.id, RequestId::from("req_1"));
            assert_eq!(req.method, "ui.getContext");
            assert_eq!(req.params.unwrap()["tab"], 1);
        });
    }

    #[test]
    fn decode_request_with_numeric_id_and_no_params() {
        let msg = decode(r#"{"jsonrpc":"2.0","id":5,"method":"system.ping"}"#).unwrap();
        assert_matches!(msg, Message::Request(req) => {
            assert_eq!(req.id, RequestId::Number(5));
            assert!(req.params.is_none());
        });
    }

    #[test]
    fn decode_success_response() {
        let msg = decode(r#"{"jsonrpc":"2.0","id":"c1","result":{"route":"/home"}}"#).unwrap();
        assert_matches!(msg, Message::Response(resp) => {
            assert_eq!(resp.result["route"], "/home");
        });
    }

    #[test]
    fn decode_null_result_is_a_response() {
        let msg = decode(r#"{"jsonrpc":"2.0","id":"c1","result":null}"#).unwrap();
        assert_matches!(msg, Message::Response(resp) => assert!(resp.result.is_null()));
    }

    #[test]
    fn decode_error_response() {
        let raw = r#"{"jsonrpc":"2.0","id":"c2","error":{"code":-32601,"message":"Method not found","data":{"m":"x"}}}"#;
        let msg = decode(raw).unwrap();
        assert_matches!(msg, Message::Error(resp) => {
            assert_eq!(resp.error.code, errors::METHOD_NOT_FOUND);
            assert_eq!(resp.error.message, "Method not found");
            assert_eq!(resp.error.data.unwrap()["m"], "x");
        });
    }

    #[test]
    fn encode_request_shape() {
        let msg = Message::request("c9", "ui.navigate", Some(json!({"to": "/settings"})));
        let v: Value = serde_json::from_str(&encode(&msg)).unwrap();
        assert_eq!(v["jsonrpc"], "2.0");
        assert_eq!(v["id"], "c9");
        assert_eq!(v["method"], "ui.navigate");
        assert_eq!(v["params"]["to"], "/settings");
    }

    #[test]
    fn encode_request_without_params_omits_field() {
        let msg = Message::request("c9", "system.ping", None);
        assert!(!encode(&msg).contains("params"));
    }

    #[test]
    fn encode_error_shape() {
        let msg = Message::error(RequestId::Number(3), errors::INTERNAL_ERROR, "Internal error");
        let v: Value = serde_json::from_str(&encode(&msg)).unwrap();
        assert_eq!(v["id"], 3);
        assert_eq!(v["error"]["code"], -32603);
        assert!(v.get("result").is_none());
        assert!(v["error"].get("data").is_none());
    }

    // ── Malformed input ─────────────────────────────────────────────

    #[test]
    fn invalid_json() {
        let err = decode("not json").unwrap_err();
        assert_matches!(err, ParseError::InvalidJson(_));
        assert_eq!(err.code(), errors::PARSE_ERROR);
    }

    #[test]
    fn empty_payload() {
        assert_matches!(decode(""), Err(ParseError::InvalidJson(_)));
    }

    #[test]
    fn non_object() {
        assert_eq!(decode("[1,2,3]"), Err(ParseError::NotAnObject));
    }

    #[test]
    fn missing_version() {
        let err = decode(r#"{"id":"a","method":"m"}"#).unwrap_err();
        assert_eq!(err, ParseError::BadVersion);
        assert_eq!(err.code(), errors::INVALID_REQUEST);
    }

    #[test]
    fn wrong_version() {
        assert_eq!(
            decode(r#"{"jsonrpc":"1.0","id":"a","method":"m"}"#),
            Err(ParseError::BadVersion)
        );
    }

    #[test]
    fn missing_id() {
        assert_eq!(
            decode(r#"{"jsonrpc":"2.0","method":"m"}"#),
            Err(ParseError::InvalidId)
        );
    }

    #[test]
    fn null_or_fractional_id() {
        assert_eq!(
            decode(r#"{"jsonrpc":"2.0","id":null,"result":1}"#),
            Err(ParseError::InvalidId)
        );
        assert_eq!(
            decode(r#"{"jsonrpc":"2.0","id":1.5,"result":1}"#),
            Err(ParseError::InvalidId)
        );
    }

    #[test]
    fn non_string_method() {
        assert_eq!(
            decode(r#"{"jsonrpc":"2.0","id":"a","method":7}"#),
            Err(ParseError::InvalidMethod)
        );
    }

    #[test]
    fn missing_method_result_and_error() {
        assert_eq!(
            decode(r#"{"jsonrpc":"2.0","id":"a"}"#),
            Err(ParseError::UnknownShape)
        );
    }

    #[test]
    fn result_and_error_together() {
        let raw = r#"{"jsonrpc":"2.0","id":"a","result":1,"error":{"code":1,"message":"x"}}"#;
        assert_eq!(decode(raw), Err(ParseError::AmbiguousReply));
    }

    #[test]
    fn malformed_error_object() {
        assert_matches!(
            decode(r#"{"jsonrpc":"2.0","id":"a","error":"bad"}"#),
            Err(ParseError::InvalidErrorObject(_))
        );
        assert_matches!(
            decode(r#"{"jsonrpc":"2.0","id":"a","error":{"message":"x"}}"#),
            Err(ParseError::InvalidErrorObject(_))
        );
        assert_matches!(
            decode(r#"{"jsonrpc":"2.0","id":"a","error":{"code":1}}"#),
            Err(ParseError::InvalidErrorObject(_))
        );
    }

    // ── Properties ──────────────────────────────────────────────────

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn arb_id() -> impl Strategy<Value = RequestId> {
            prop_oneof![
                any::<i64>().prop_map(RequestId::Number),
                "[a-zA-Z0-9_-]{1,24}".prop_map(RequestId::String),
            ]
        }

        fn arb_json() -> impl Strategy<Value = Value> {
            let leaf = prop_oneof![
                Just(Value::Null),
                any::<bool>().prop_map(Value::from),
                any::<i64>().prop_map(Value::from),
                ".{0,16}".prop_map(Value::from),
            ];
            leaf.prop_recursive(3, 24, 4, |inner| {
                prop_oneof![
                    proptest::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                    proptest::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                        .prop_map(|m| Value::Object(m.into_iter().collect())),
                ]
            })
        }

        proptest! {
            #[test]
            fn request_decode_inverts_encode(
                id in arb_id(),
                method in "[a-z]{1,8}(\\.[a-zA-Z]{1,12})?",
                params in proptest::option::of(arb_json()),
            ) {
                let msg = Message::request(id, method, params);
                prop_assert_eq!(decode(&encode(&msg)), Ok(msg));
            }

            #[test]
            fn replies_decode_inverse_encode(id in arb_id(), result in arb_json(), code in any::<i32>()) {
                let ok = Message::success(id.clone(), result.clone());
                prop_assert_eq!(decode(&encode(&ok)), Ok(ok));
                let err = Message::error_body(id, RpcErrorBody {
                    code: i64::from(code),
                    message: "failed".into(),
                    data: Some(result),
                });
                prop_assert_eq!(decode(&encode(&err)), Ok(err));
            }

            #[test]
            fn decode_never_panics(raw in ".{0,64}") {
                let _ = decode(&raw);
            }
        }
    }
}
