//! # switchboard-rpc
//!
//! JSON-RPC 2.0 wire layer shared by both directions of a channel:
//! - [`envelope`]: request / response / error shapes and id correlation
//! - [`codec`]: `encode` / `decode` with a typed [`codec::ParseError`]
//! - [`errors`]: wire error codes and the handler error type

#![deny(unsafe_code)]

pub mod codec;
pub mod envelope;
pub mod errors;

pub use codec::{decode, encode, ParseError};
pub use envelope::{Message, RequestId, RpcErrorBody, RpcErrorResponse, RpcRequest, RpcResponse};
pub use errors::RpcError;
