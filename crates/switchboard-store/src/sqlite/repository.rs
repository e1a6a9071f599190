//! Connection record repository for the `connections` table.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use switchboard_core::{ChannelRef, TenantId};

use crate::errors::{Result, StoreError};
use crate::record::ConnectionRecord;

/// Raw `connections` row before timestamp parsing.
#[derive(Debug)]
struct ConnectionRow {
    tenant_id: String,
    connected: bool,
    channel_ref: String,
    last_connected_at: String,
}

impl ConnectionRow {
    fn into_record(self) -> Result<ConnectionRecord> {
        let last_connected_at = DateTime::parse_from_rfc3339(&self.last_connected_at)
            .map_err(|e| StoreError::Corrupt {
                tenant_id: self.tenant_id.clone(),
                message: format!("last_connected_at {:?}: {e}", self.last_connected_at),
            })?
            .with_timezone(&Utc);
        Ok(ConnectionRecord {
            tenant_id: TenantId::from(self.tenant_id),
            connected: self.connected,
            channel_ref: ChannelRef::from(self.channel_ref),
            last_connected_at,
        })
    }
}

/// Stateless repository; every method takes `&Connection`.
pub struct ConnectionRepo;

impl ConnectionRepo {
    /// Insert or replace the record for `record.tenant_id`.
    pub fn upsert(conn: &Connection, record: &ConnectionRecord) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let _ = conn.execute(
            "INSERT INTO connections (tenant_id, connected, channel_ref, last_connected_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(tenant_id) DO UPDATE SET
                 connected = excluded.connected,
                 channel_ref = excluded.channel_ref,
                 last_connected_at = excluded.last_connected_at,
                 updated_at = excluded.updated_at",
            params![
                record.tenant_id.as_str(),
                record.connected,
                record.channel_ref.as_str(),
                record.last_connected_at.to_rfc3339(),
                now,
            ],
        )?;
        Ok(())
    }

    /// Fetch one tenant's record.
    pub fn get(conn: &Connection, tenant_id: &TenantId) -> Result<Option<ConnectionRecord>> {
        let row = conn
            .query_row(
                "SELECT tenant_id, connected, channel_ref, last_connected_at
                 FROM connections WHERE tenant_id = ?1",
                params![tenant_id.as_str()],
                Self::map_row,
            )
            .optional()?;
        row.map(ConnectionRow::into_record).transpose()
    }

    /// Flip `connected` to false if the row still belongs to `channel_ref`.
    pub fn mark_disconnected(
        conn: &Connection,
        tenant_id: &TenantId,
        channel_ref: &ChannelRef,
    ) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE connections SET connected = 0, updated_at = ?3
             WHERE tenant_id = ?1 AND channel_ref = ?2 AND connected = 1",
            params![tenant_id.as_str(), channel_ref.as_str(), Utc::now().to_rfc3339()],
        )?;
        Ok(changed > 0)
    }

    /// Count of records currently flagged connected.
    pub fn count_connected(conn: &Connection) -> Result<u64> {
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM connections WHERE connected = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(n).unwrap_or_default())
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConnectionRow> {
        Ok(ConnectionRow {
            tenant_id: row.get(0)?,
            connected: row.get::<_, i64>(1)? == 1,
            channel_ref: row.get(2)?,
            last_connected_at: row.get(3)?,
        })
    }
}

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;
    use crate::sqlite::migrations::run_migrations;
    use assert_matches::assert_matches;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn record(tenant: &str, channel: &str) -> ConnectionRecord {
        ConnectionRecord::connected_now(TenantId::from(tenant), ChannelRef::from(channel))
    }

    #[test]
    fn upsert_inserts_then_updates() {
        let conn = setup();
        ConnectionRepo::upsert(&conn, &record("t1", "r1")).unwrap();
        ConnectionRepo::upsert(&conn, &record("t1", "r2")).unwrap();

        let got = ConnectionRepo::get(&conn, &TenantId::from("t1"))
            .unwrap()
            .unwrap();
        assert_eq!(got.channel_ref, ChannelRef::from("r2"));
        assert!(got.connected);

        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM connections", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn timestamp_roundtrips() {
        let conn = setup();
        let rec = record("t1", "r1");
        ConnectionRepo::upsert(&conn, &rec).unwrap();
        let got = ConnectionRepo::get(&conn, &TenantId::from("t1"))
            .unwrap()
            .unwrap();
        assert_eq!(got.last_connected_at, rec.last_connected_at);
    }

    #[test]
    fn get_missing() {
        let conn = setup();
        assert!(ConnectionRepo::get(&conn, &TenantId::from("nope")).unwrap().is_none());
    }

    #[test]
    fn mark_disconnected_is_compare_and_set() {
        let conn = setup();
        ConnectionRepo::upsert(&conn, &record("t1", "r2")).unwrap();

        let tenant = TenantId::from("t1");
        assert!(!ConnectionRepo::mark_disconnected(&conn, &tenant, &ChannelRef::from("r1")).unwrap());
        assert!(ConnectionRepo::get(&conn, &tenant).unwrap().unwrap().connected);

        assert!(ConnectionRepo::mark_disconnected(&conn, &tenant, &ChannelRef::from("r2")).unwrap());
        assert!(!ConnectionRepo::get(&conn, &tenant).unwrap().unwrap().connected);

        // second flip changes nothing
        assert!(!ConnectionRepo::mark_disconnected(&conn, &tenant, &ChannelRef::from("r2")).unwrap());
    }

    #[test]
    fn count_connected() {
        let conn = setup();
        ConnectionRepo::upsert(&conn, &record("t1", "r1")).unwrap();
        ConnectionRepo::upsert(&conn, &record("t2", "r2")).unwrap();
        ConnectionRepo::mark_disconnected(&conn, &TenantId::from("t2"), &ChannelRef::from("r2"))
            .unwrap();
        assert_eq!(ConnectionRepo::count_connected(&conn).unwrap(), 1);
    }

    #[test]
    fn corrupt_timestamp_is_reported() {
        let conn = setup();
        conn.execute(
            "INSERT INTO connections VALUES ('t1', 1, 'r1', 'yesterday', 'x')",
            [],
        )
        .unwrap();
        let err = ConnectionRepo::get(&conn, &TenantId::from("t1")).unwrap_err();
        assert_matches!(err, StoreError::Corrupt { ref tenant_id, .. } if tenant_id == "t1");
    }
}
