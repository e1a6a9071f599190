//! The durable presence record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use switchboard_core::{ChannelRef, TenantId};

/// Last known connection state of one tenant.
///
/// Created on the tenant's first connection and updated on every connect and
/// disconnect. `connected` may lag reality when a process dies without
/// running its disconnect path; readers reconcile it against the local
/// channel map.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRecord {
    /// Owning tenant (unique key).
    pub tenant_id: TenantId,
    /// Whether the tenant was last seen connected.
    pub connected: bool,
    /// Reference of the channel that wrote the record.
    pub channel_ref: ChannelRef,
    /// When the tenant last connected.
    pub last_connected_at: DateTime<Utc>,
}

impl ConnectionRecord {
    /// A fresh `connected = true` record stamped with the current time.
    pub fn connected_now(tenant_id: TenantId, channel_ref: ChannelRef) -> Self {
        Self {
            tenant_id,
            connected: true,
            channel_ref,
            last_connected_at: Utc::now(),
        }
    }

    /// Whether this record was written by `channel_ref`.
    pub fn is_owned_by(&self, channel_ref: &ChannelRef) -> bool {
        &self.channel_ref == channel_ref
    }
}
