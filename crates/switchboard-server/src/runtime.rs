//! The object that owns method table, pending calls and local channels.
//!
//! One `RpcRuntime` is built at startup and shared by `Arc` with the
//! transport layer and with feature code that calls into tenants.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use switchboard_core::TenantId;
use switchboard_store::PresenceStore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::calls::{CallError, OutboundCalls};
use crate::channel::ClientChannel;
use crate::presence::ConnectionRegistry;
use crate::rpc::{MethodRegistry, RpcContext};

/// Counts reported by [`RpcRuntime::shutdown`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Pending outbound calls that were failed.
    pub failed_calls: usize,
    /// Presence records flipped to disconnected.
    pub released_connections: usize,
}

/// Bidirectional RPC runtime.
pub struct RpcRuntime {
    registry: MethodRegistry,
    connections: Arc<ConnectionRegistry>,
    calls: Arc<OutboundCalls>,
}

impl RpcRuntime {
    /// Build a runtime over `store`. The registry is frozen from here on.
    pub fn new(
        registry: MethodRegistry,
        store: Arc<dyn PresenceStore>,
        default_call_timeout: Duration,
    ) -> Self {
        let connections = Arc::new(ConnectionRegistry::new(store));
        let calls = Arc::new(OutboundCalls::new(
            Arc::clone(&connections),
            default_call_timeout,
        ));
        Self {
            registry,
            connections,
            calls,
        }
    }

    /// Inbound method table.
    pub fn registry(&self) -> &MethodRegistry {
        &self.registry
    }

    /// Tenant to channel resolution.
    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    /// Outbound pending-call table.
    pub fn calls(&self) -> &Arc<OutboundCalls> {
        &self.calls
    }

    /// Call `method` on `tenant_id`. See [`OutboundCalls::call`].
    pub async fn call(
        &self,
        tenant_id: &TenantId,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, CallError> {
        self.calls.call(tenant_id, method, params, timeout).await
    }

    /// Call with the configured default timeout.
    pub async fn call_default(
        &self,
        tenant_id: &TenantId,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, CallError> {
        self.calls.call_default(tenant_id, method, params).await
    }

    /// Handler context for a request arriving on `channel`.
    pub fn context(self: &Arc<Self>, channel: Arc<ClientChannel>) -> RpcContext {
        RpcContext::new(Arc::clone(self), channel)
    }

    /// Start the abandoned-call reaper.
    pub fn spawn_reaper(&self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        self.calls.spawn_reaper(interval, cancel)
    }

    /// Fail pending calls and release every local channel.
    pub async fn shutdown(&self) -> ShutdownReport {
        let failed_calls = self.calls.fail_all();
        let released_connections = self.connections.release_local().await;
        info!(failed_calls, released_connections, "rpc runtime shut down");
        ShutdownReport {
            failed_calls,
            released_connections,
        }
    }
}

impl std::fmt::Debug for RpcRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcRuntime")
            .field("methods", &self.registry.methods())
            .field("connections", &self.connections)
            .field("calls", &self.calls)
            .finish()
    }
}
