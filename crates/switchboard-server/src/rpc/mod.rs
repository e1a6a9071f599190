//! Inbound RPC: handler trait, registry, context and built-in handlers.

pub mod context;
pub mod handlers;
pub mod registry;
pub mod validation;

pub use context::RpcContext;
pub use registry::{MethodHandler, MethodRegistry};
