//! Context handed to every method handler.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use switchboard_core::{ChannelRef, TenantId};

use crate::calls::CallError;
use crate::channel::ClientChannel;
use crate::runtime::RpcRuntime;

/// Who sent the request and how to reach the rest of the runtime.
#[derive(Clone)]
pub struct RpcContext {
    /// Tenant that sent the request.
    pub tenant_id: TenantId,
    /// Channel the request arrived on (replies go back here).
    pub channel: Arc<ClientChannel>,
    /// Owning runtime, for handlers that call back into a tenant.
    pub runtime: Arc<RpcRuntime>,
}

impl RpcContext {
    /// Build a context for a request arriving on `channel`.
    pub fn new(runtime: Arc<RpcRuntime>, channel: Arc<ClientChannel>) -> Self {
        Self {
            tenant_id: channel.tenant_id().clone(),
            channel,
            runtime,
        }
    }

    /// Reference of the originating channel.
    pub fn channel_ref(&self) -> &ChannelRef {
        self.channel.channel_ref()
    }

    /// Call a method on the requesting tenant.
    pub async fn call_back(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, CallError> {
        self.runtime
            .call(&self.tenant_id, method, params, timeout)
            .await
    }
}

impl std::fmt::Debug for RpcContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcContext")
            .field("tenant_id", &self.tenant_id)
            .field("channel_ref", self.channel.channel_ref())
            .finish_non_exhaustive()
    }
}
