//! # switchboard-server
//!
//! Lets server-side code call methods on a specific connected tenant, and
//! lets tenants call methods on the server, over one WebSocket per tenant.
//!
//! - [`rpc`]: method registry, handler context and built-in handlers
//! - [`presence`]: tenant to channel resolution backed by a durable record
//! - [`calls`]: outbound calls with id correlation and deadlines
//! - [`dispatcher`]: per-channel event loop routing requests and replies
//! - [`runtime`]: the object that owns all of the above
//! - [`websocket`] / [`server`] / [`api`]: Axum transport and HTTP surface
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod api;
pub mod calls;
pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod health;
pub mod metrics;
pub mod presence;
pub mod rpc;
pub mod runtime;
pub mod server;
pub mod shutdown;
pub mod websocket;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use calls::{CallError, OutboundCalls};
pub use channel::{ChannelEvent, ClientChannel};
pub use config::ServerConfig;
pub use presence::{ConnectionRegistry, PresenceSnapshot};
pub use runtime::{RpcRuntime, ShutdownReport};
pub use server::SwitchboardServer;
