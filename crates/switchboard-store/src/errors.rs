//! Presence store error types.

use thiserror::Error;

/// Errors from presence store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `SQLite` database error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Schema migration failed.
    #[error("migration error: {message}")]
    Migration {
        /// Describes which migration failed and why.
        message: String,
    },

    /// A stored value could not be decoded.
    #[error("corrupt record for tenant {tenant_id}: {message}")]
    Corrupt {
        /// Tenant whose row is unreadable.
        tenant_id: String,
        /// What was wrong with it.
        message: String,
    },

    /// Store unavailable or otherwise failed (e.g. a blocking task panicked).
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Convenience type alias for store results.
pub type Result<T> = std::result::Result<T, StoreError>;
