//! The presence store seam.
//!
//! Writes are last-writer-wins upserts keyed by tenant. Disconnects are
//! compare-and-set on the channel reference so that a stale disconnect can
//! never flip a newer registration.

use std::collections::HashMap;

use parking_lot::Mutex;
use switchboard_core::{ChannelRef, TenantId};

use crate::errors::Result;
use crate::record::ConnectionRecord;

/// Durable per-tenant connection state.
///
/// Implementations are synchronous; async callers run them on the blocking
/// pool.
pub trait PresenceStore: Send + Sync {
    /// Insert or replace the tenant's record.
    fn upsert(&self, record: &ConnectionRecord) -> Result<()>;

    /// Fetch the tenant's record, if any.
    fn get(&self, tenant_id: &TenantId) -> Result<Option<ConnectionRecord>>;

    /// Set `connected = false` only if the record still points at
    /// `channel_ref`. Returns whether a record was changed.
    ///
    /// The default implementation reads then writes and is only atomic when
    /// the implementation serializes access itself.
    fn mark_disconnected(&self, tenant_id: &TenantId, channel_ref: &ChannelRef) -> Result<bool> {
        match self.get(tenant_id)? {
            Some(mut record) if record.connected && record.is_owned_by(channel_ref) => {
                record.connected = false;
                self.upsert(&record)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Process-local store used in tests and for `:memory:` deployments that do
/// not need the record to survive a restart.
#[derive(Debug, Default)]
pub struct MemoryPresenceStore {
    records: Mutex<HashMap<TenantId, ConnectionRecord>>,
}

impl MemoryPresenceStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether no records are stored.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl PresenceStore for MemoryPresenceStore {
    fn upsert(&self, record: &ConnectionRecord) -> Result<()> {
        let _ = self
            .records
            .lock()
            .insert(record.tenant_id.clone(), record.clone());
        Ok(())
    }

    fn get(&self, tenant_id: &TenantId) -> Result<Option<ConnectionRecord>> {
        Ok(self.records.lock().get(tenant_id).cloned())
    }

    fn mark_disconnected(&self, tenant_id: &TenantId, channel_ref: &ChannelRef) -> Result<bool> {
        let mut records = self.records.lock();
        match records.get_mut(tenant_id) {
            Some(record) if record.connected && record.is_owned_by(channel_ref) => {
                record.connected = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
