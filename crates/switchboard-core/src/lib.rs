//! # switchboard-core
//!
//! Shared vocabulary for the Switchboard crates:
//!
//! - **Branded IDs**: `TenantId`, `ChannelRef`, `CallId` as newtypes so a
//!   channel reference can never be passed where a tenant is expected
//! - **Logging**: `tracing` subscriber initialisation used by the server binary

#![deny(unsafe_code)]

pub mod ids;
pub mod logging;

pub use ids::{CallId, ChannelRef, TenantId};
