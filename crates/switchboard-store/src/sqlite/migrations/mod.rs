//! Schema migrations.
//!
//! Each step is an embedded SQL script. The applied version lives in
//! `PRAGMA user_version`, bumped inside the same transaction as the script,
//! so a crash mid-step leaves the previous version in place.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::{Result, StoreError};

/// `(version, label, script)` in ascending version order.
const STEPS: &[(u32, &str, &str)] = &[(1, "connections", include_str!("v001_connections.sql"))];

/// Bring the schema up to [`latest_version`]. Returns how many steps ran.
pub fn run_migrations(conn: &Connection) -> Result<u32> {
    let from = current_version(conn)?;
    let pending = STEPS.iter().filter(|(version, ..)| *version > from);

    let mut ran = 0;
    for &(version, label, script) in pending {
        info!(version, label, "migrating presence schema");
        step(conn, version, script).map_err(|e| StoreError::Migration {
            message: format!("v{version} ({label}): {e}"),
        })?;
        ran += 1;
    }
    if ran == 0 {
        debug!(version = from, "presence schema up to date");
    }
    Ok(ran)
}

/// Version recorded in the database file, 0 for a fresh file.
pub fn current_version(conn: &Connection) -> Result<u32> {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(|e| StoreError::Migration {
            message: format!("cannot read user_version: {e}"),
        })
}

/// Newest version this build knows how to create.
pub fn latest_version() -> u32 {
    STEPS.last().map_or(0, |(version, ..)| *version)
}

fn step(conn: &Connection, version: u32, script: &str) -> rusqlite::Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(script)?;
    tx.pragma_update(None, "user_version", version)?;
    tx.commit()
}
