//! `SQLite` backend for presence records.
//!
//! - **[`connection`]**: `r2d2` pool with WAL mode and busy timeout applied to
//!   every connection.
//! - **[`migrations`]**: version-tracked schema, embedded at compile time.
//! - **[`repository`]**: stateless SQL functions over `&Connection`.
//! - **[`store`]**: [`SqlitePresenceStore`], the pooled [`PresenceStore`](crate::PresenceStore).

pub mod connection;
pub mod migrations;
pub mod repository;
pub mod store;

pub use connection::{ConnectionConfig, ConnectionPool, PooledConnection, new_file, new_in_memory};
pub use migrations::{current_version, latest_version, run_migrations};
pub use store::SqlitePresenceStore;
