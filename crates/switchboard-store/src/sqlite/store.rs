//! Pooled `SQLite` presence store.

use switchboard_core::{ChannelRef, TenantId};

use crate::errors::Result;
use crate::record::ConnectionRecord;
use crate::sqlite::connection::{ConnectionPool, PooledConnection};
use crate::sqlite::migrations::run_migrations;
use crate::sqlite::repository::ConnectionRepo;
use crate::store::PresenceStore;

/// [`PresenceStore`] over an `r2d2` `SQLite` pool.
///
/// `mark_disconnected` is a single conditional `UPDATE`, so it is atomic even
/// when several processes share the database file.
#[derive(Clone)]
pub struct SqlitePresenceStore {
    pool: ConnectionPool,
}

impl SqlitePresenceStore {
    /// Wrap `pool`, applying pending migrations first.
    pub fn open(pool: ConnectionPool) -> Result<Self> {
        {
            let conn = pool.get()?;
            let _ = run_migrations(&conn)?;
        }
        Ok(Self { pool })
    }

    /// Number of tenants currently flagged connected.
    pub fn count_connected(&self) -> Result<u64> {
        let conn = self.conn()?;
        ConnectionRepo::count_connected(&conn)
    }

    fn conn(&self) -> Result<PooledConnection> {
        Ok(self.pool.get()?)
    }
}

impl PresenceStore for SqlitePresenceStore {
    fn upsert(&self, record: &ConnectionRecord) -> Result<()> {
        let conn = self.conn()?;
        ConnectionRepo::upsert(&conn, record)
    }

    fn get(&self, tenant_id: &TenantId) -> Result<Option<ConnectionRecord>> {
        let conn = self.conn()?;
        ConnectionRepo::get(&conn, tenant_id)
    }

    fn mark_disconnected(&self, tenant_id: &TenantId, channel_ref: &ChannelRef) -> Result<bool> {
        let conn = self.conn()?;
        ConnectionRepo::mark_disconnected(&conn, tenant_id, channel_ref)
    }
}
