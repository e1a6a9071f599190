//! Tenant to channel resolution.
//!
//! A tenant is reachable only when its durable record says `connected` AND
//! the record's channel reference is present in this process's local map.
//! The record alone can outlive the channel (crash, restart), so a connected
//! record with no local channel is corrected on read.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::{counter, gauge};
use parking_lot::Mutex;
use serde::Serialize;
use switchboard_core::{ChannelRef, TenantId};
use switchboard_store::{ConnectionRecord, PresenceStore, StoreError};
use tracing::{debug, info, warn};

use crate::channel::ClientChannel;
use crate::metrics::{PRESENCE_LOCAL_CHANNELS, PRESENCE_SELF_HEALS_TOTAL, PRESENCE_STORE_ERRORS_TOTAL};

/// Point-in-time view of one tenant, served by the HTTP API.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceSnapshot {
    /// Tenant queried.
    pub tenant_id: TenantId,
    /// Whether a call issued now would find a channel.
    pub reachable: bool,
    /// Durable record after any self-heal.
    pub record: Option<ConnectionRecord>,
}

/// Local channel map plus the durable presence store.
pub struct ConnectionRegistry {
    local: Mutex<HashMap<ChannelRef, Arc<ClientChannel>>>,
    store: Arc<dyn PresenceStore>,
}

impl ConnectionRegistry {
    /// Create a registry over `store` with an empty local map.
    pub fn new(store: Arc<dyn PresenceStore>) -> Self {
        Self {
            local: Mutex::new(HashMap::new()),
            store,
        }
    }

    /// Make `channel` resolvable for its tenant.
    ///
    /// Supersedes any previous registration of the tenant. The previous
    /// channel stays in the local map until its own disconnect path runs.
    pub async fn register_connection(
        &self,
        channel: Arc<ClientChannel>,
    ) -> Result<ChannelRef, StoreError> {
        let channel_ref = channel.channel_ref().clone();
        let tenant_id = channel.tenant_id().clone();
        self.insert_local(channel);

        let record = ConnectionRecord::connected_now(tenant_id.clone(), channel_ref.clone());
        if let Err(e) = self.with_store(move |s| s.upsert(&record)).await {
            counter!(PRESENCE_STORE_ERRORS_TOTAL, "op" => "upsert").increment(1);
            warn!(%tenant_id, %channel_ref, error = %e, "presence upsert failed, evicting channel");
            let _ = self.remove_local(&channel_ref);
            return Err(e);
        }

        info!(%tenant_id, %channel_ref, "tenant connected");
        Ok(channel_ref)
    }

    /// Evict `channel_ref` and mark the tenant disconnected if the record
    /// still points at it.
    ///
    /// Returns whether the durable record was changed.
    pub async fn unregister_connection(
        &self,
        tenant_id: &TenantId,
        channel_ref: &ChannelRef,
    ) -> Result<bool, StoreError> {
        let _ = self.remove_local(channel_ref);

        let changed = self.mark_disconnected(tenant_id, channel_ref).await?;
        if changed {
            info!(%tenant_id, %channel_ref, "tenant disconnected");
        } else {
            debug!(%tenant_id, %channel_ref, "stale disconnect, record left untouched");
        }
        Ok(changed)
    }

    /// The live channel for `tenant_id`, if any.
    ///
    /// Never fails: store errors are logged and treated as unreachable.
    pub async fn resolve_channel(&self, tenant_id: &TenantId) -> Option<Arc<ClientChannel>> {
        let record = match self.read_record(tenant_id).await {
            Ok(Some(record)) if record.connected => record,
            Ok(_) => return None,
            Err(e) => {
                warn!(%tenant_id, error = %e, "presence lookup failed, treating tenant as unreachable");
                return None;
            }
        };

        if let Some(channel) = self.local.lock().get(&record.channel_ref).cloned() {
            return Some(channel);
        }

        // Record claims a channel this process does not hold.
        counter!(PRESENCE_SELF_HEALS_TOTAL).increment(1);
        match self.mark_disconnected(tenant_id, &record.channel_ref).await {
            Ok(changed) => info!(
                %tenant_id,
                channel_ref = %record.channel_ref,
                changed,
                "presence record had no local channel, marked disconnected"
            ),
            Err(e) => warn!(
                %tenant_id,
                channel_ref = %record.channel_ref,
                error = %e,
                "presence self-heal failed"
            ),
        }
        None
    }

    /// Resolve `tenant_id` and return the resulting record.
    pub async fn presence(&self, tenant_id: &TenantId) -> Result<PresenceSnapshot, StoreError> {
        let reachable = self.resolve_channel(tenant_id).await.is_some();
        let record = self.read_record(tenant_id).await?;
        Ok(PresenceSnapshot {
            tenant_id: tenant_id.clone(),
            reachable,
            record,
        })
    }

    /// Number of channels held by this process.
    pub fn local_count(&self) -> usize {
        self.local.lock().len()
    }

    /// Drop every local channel without touching the store.
    ///
    /// Simulates a process restart: records stay `connected` until the next
    /// resolve corrects them.
    pub fn clear_local(&self) {
        self.local.lock().clear();
        set_local_gauge(0);
    }

    /// Drop every local channel and mark each tenant disconnected.
    ///
    /// Used on shutdown. Returns how many records were changed.
    pub async fn release_local(&self) -> usize {
        let drained: Vec<Arc<ClientChannel>> = {
            let mut local = self.local.lock();
            local.drain().map(|(_, ch)| ch).collect()
        };
        set_local_gauge(0);

        let mut released = 0;
        for channel in drained {
            match self
                .mark_disconnected(channel.tenant_id(), channel.channel_ref())
                .await
            {
                Ok(true) => released += 1,
                Ok(false) => {}
                Err(e) => warn!(
                    tenant_id = %channel.tenant_id(),
                    channel_ref = %channel.channel_ref(),
                    error = %e,
                    "failed to release presence record"
                ),
            }
        }
        released
    }

    fn insert_local(&self, channel: Arc<ClientChannel>) {
        let mut local = self.local.lock();
        let _ = local.insert(channel.channel_ref().clone(), channel);
        set_local_gauge(local.len());
    }

    fn remove_local(&self, channel_ref: &ChannelRef) -> Option<Arc<ClientChannel>> {
        let mut local = self.local.lock();
        let removed = local.remove(channel_ref);
        set_local_gauge(local.len());
        removed
    }

    async fn read_record(&self, tenant_id: &TenantId) -> Result<Option<ConnectionRecord>, StoreError> {
        let tenant = tenant_id.clone();
        self.with_store(move |s| s.get(&tenant)).await.inspect_err(|_| {
            counter!(PRESENCE_STORE_ERRORS_TOTAL, "op" => "get").increment(1);
        })
    }

    async fn mark_disconnected(
        &self,
        tenant_id: &TenantId,
        channel_ref: &ChannelRef,
    ) -> Result<bool, StoreError> {
        let tenant = tenant_id.clone();
        let reference = channel_ref.clone();
        self.with_store(move |s| s.mark_disconnected(&tenant, &reference))
            .await
            .inspect_err(|_| {
                counter!(PRESENCE_STORE_ERRORS_TOTAL, "op" => "mark_disconnected").increment(1);
            })
    }

    /// Run a synchronous store operation on the blocking pool.
    async fn with_store<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn PresenceStore) -> Result<T, StoreError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || op(store.as_ref()))
            .await
            .map_err(|e| StoreError::Unavailable(format!("store task failed: {e}")))?
    }
}

#[allow(clippy::cast_precision_loss)]
fn set_local_gauge(len: usize) {
    gauge!(PRESENCE_LOCAL_CHANNELS).set(len as f64);
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("local_count", &self.local_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::make_channel;
    use assert_matches::assert_matches;
    use switchboard_store::MemoryPresenceStore;

    fn registry() -> (ConnectionRegistry, Arc<MemoryPresenceStore>) {
        let store = Arc::new(MemoryPresenceStore::new());
        (ConnectionRegistry::new(store.clone()), store)
    }

    fn record(store: &MemoryPresenceStore, tenant: &str) -> Option<ConnectionRecord> {
        store.get(&TenantId::from(tenant)).unwrap()
    }

    /// Store whose every operation fails.
    struct BrokenStore;

    impl PresenceStore for BrokenStore {
        fn upsert(&self, _record: &ConnectionRecord) -> switchboard_store::Result<()> {
            Err(StoreError::Unavailable("disk gone".into()))
        }

        fn get(&self, _tenant_id: &TenantId) -> switchboard_store::Result<Option<ConnectionRecord>> {
            Err(StoreError::Unavailable("disk gone".into()))
        }
    }

    // ── register / resolve ──────────────────────────────────────────

    #[tokio::test]
    async fn register_then_resolve() {
        let (reg, store) = registry();
        let (ch, _rx) = make_channel("t1");

        let r1 = reg.register_connection(ch.clone()).await.unwrap();
        assert_eq!(&r1, ch.channel_ref());

        let resolved = reg.resolve_channel(&TenantId::from("t1")).await.unwrap();
        assert!(Arc::ptr_eq(&resolved, &ch));

        let rec = record(&store, "t1").unwrap();
        assert!(rec.connected);
        assert_eq!(rec.channel_ref, r1);
        assert_eq!(reg.local_count(), 1);
    }

    #[tokio::test]
    async fn unknown_tenant_is_unreachable() {
        let (reg, store) = registry();
        assert!(reg.resolve_channel(&TenantId::from("nobody")).await.is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn disconnected_record_is_unreachable() {
        let (reg, _store) = registry();
        let (ch, _rx) = make_channel("t1");
        let r1 = reg.register_connection(ch).await.unwrap();
        assert!(reg.unregister_connection(&TenantId::from("t1"), &r1).await.unwrap());
        assert!(reg.resolve_channel(&TenantId::from("t1")).await.is_none());
    }

    #[tokio::test]
    async fn register_failure_evicts_local_entry() {
        let reg = ConnectionRegistry::new(Arc::new(BrokenStore));
        let (ch, _rx) = make_channel("t1");
        let err = reg.register_connection(ch).await.unwrap_err();
        assert_matches!(err, StoreError::Unavailable(_));
        assert_eq!(reg.local_count(), 0);
    }

    #[tokio::test]
    async fn store_read_failure_is_unreachable() {
        let reg = ConnectionRegistry::new(Arc::new(BrokenStore));
        assert!(reg.resolve_channel(&TenantId::from("t1")).await.is_none());
    }

    // ── supersede / stale disconnect ────────────────────────────────

    #[tokio::test]
    async fn reregister_supersedes_and_old_unregister_is_stale() {
        let (reg, store) = registry();
        let tenant = TenantId::from("t1");
        let (old, _rx1) = make_channel("t1");
        let (new, _rx2) = make_channel("t1");

        let r1 = reg.register_connection(old).await.unwrap();
        let r2 = reg.register_connection(new.clone()).await.unwrap();
        assert_ne!(r1, r2);
        assert_eq!(reg.local_count(), 2);

        let changed = reg.unregister_connection(&tenant, &r1).await.unwrap();
        assert!(!changed);
        assert_eq!(reg.local_count(), 1);

        let rec = record(&store, "t1").unwrap();
        assert!(rec.connected);
        assert_eq!(rec.channel_ref, r2);

        let resolved = reg.resolve_channel(&tenant).await.unwrap();
        assert!(Arc::ptr_eq(&resolved, &new));
    }

    // ── self-heal ───────────────────────────────────────────────────

    #[tokio::test]
    async fn cleared_local_map_self_heals_record() {
        let (reg, store) = registry();
        let tenant = TenantId::from("t1");
        let (ch, _rx) = make_channel("t1");
        let _ = reg.register_connection(ch.clone()).await.unwrap();
        assert!(reg.resolve_channel(&tenant).await.is_some());

        reg.clear_local();
        assert!(record(&store, "t1").unwrap().connected);

        assert!(reg.resolve_channel(&tenant).await.is_none());
        let rec = record(&store, "t1").unwrap();
        assert!(!rec.connected);
        assert_eq!(&rec.channel_ref, ch.channel_ref());
    }

    #[tokio::test]
    async fn presence_snapshot_reflects_self_heal() {
        let (reg, _store) = registry();
        let tenant = TenantId::from("t1");
        let (ch, _rx) = make_channel("t1");
        let _ = reg.register_connection(ch).await.unwrap();

        let snap = reg.presence(&tenant).await.unwrap();
        assert!(snap.reachable);
        assert!(snap.record.as_ref().unwrap().connected);

        reg.clear_local();
        let snap = reg.presence(&tenant).await.unwrap();
        assert!(!snap.reachable);
        assert!(!snap.record.unwrap().connected);
    }

    #[tokio::test]
    async fn presence_for_unknown_tenant() {
        let (reg, _store) = registry();
        let snap = reg.presence(&TenantId::from("ghost")).await.unwrap();
        assert!(!snap.reachable);
        assert!(snap.record.is_none());
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["tenantId"], "ghost");
        assert!(json["record"].is_null());
    }

    #[tokio::test]
    async fn presence_propagates_store_error() {
        let reg = ConnectionRegistry::new(Arc::new(BrokenStore));
        assert!(reg.presence(&TenantId::from("t1")).await.is_err());
    }

    // ── shutdown ────────────────────────────────────────────────────

    #[tokio::test]
    async fn release_local_marks_all_disconnected() {
        let (reg, store) = registry();
        let (a, _ra) = make_channel("a");
        let (b, _rb) = make_channel("b");
        let _ = reg.register_connection(a).await.unwrap();
        let _ = reg.register_connection(b).await.unwrap();

        assert_eq!(reg.release_local().await, 2);
        assert_eq!(reg.local_count(), 0);
        assert!(!record(&store, "a").unwrap().connected);
        assert!(!record(&store, "b").unwrap().connected);
    }

    #[tokio::test]
    async fn release_local_skips_superseded_channels() {
        let (reg, store) = registry();
        let (old, _r1) = make_channel("t1");
        let (new, _r2) = make_channel("t1");
        let _ = reg.register_connection(old).await.unwrap();
        let r2 = reg.register_connection(new).await.unwrap();

        assert_eq!(reg.release_local().await, 1);
        let rec = record(&store, "t1").unwrap();
        assert!(!rec.connected);
        assert_eq!(rec.channel_ref, r2);
    }
}
