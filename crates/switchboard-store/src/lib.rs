//! # switchboard-store
//!
//! Durable "is this tenant connected" state.
//!
//! - **[`record`]**: the [`ConnectionRecord`] row, one per tenant, never deleted
//! - **[`store`]**: the [`PresenceStore`] trait and an in-memory implementation
//! - **[`sqlite`]**: `r2d2` pool, migrations and the `SQLite`-backed store
//!
//! The store only knows about records. Whether a record's channel is actually
//! reachable is decided by the connection registry in `switchboard-server`,
//! which pairs each record with its process-local channel map.

#![deny(unsafe_code)]

pub mod errors;
pub mod record;
pub mod sqlite;
pub mod store;

pub use errors::{Result, StoreError};
pub use record::ConnectionRecord;
pub use sqlite::SqlitePresenceStore;
pub use store::{MemoryPresenceStore, PresenceStore};
