//! Shared fixtures for unit tests.

use std::sync::Arc;
use std::time::Duration;

use switchboard_core::TenantId;
use switchboard_store::{MemoryPresenceStore, PresenceStore};
use tokio::sync::mpsc;

use crate::channel::ClientChannel;
use crate::rpc::handlers::register_all;
use crate::rpc::{MethodRegistry, RpcContext};
use crate::runtime::RpcRuntime;

/// Runtime over an in-memory store with the built-in handlers registered.
pub fn make_runtime() -> Arc<RpcRuntime> {
    make_runtime_with_store(Arc::new(MemoryPresenceStore::new()))
}

/// Runtime over the given store with the built-in handlers registered.
pub fn make_runtime_with_store(store: Arc<dyn PresenceStore>) -> Arc<RpcRuntime> {
    let mut registry = MethodRegistry::new();
    register_all(&mut registry);
    Arc::new(RpcRuntime::new(registry, store, Duration::from_secs(30)))
}

/// A channel for `tenant` plus the receiving end of its send queue.
pub fn make_channel(tenant: &str) -> (Arc<ClientChannel>, mpsc::Receiver<String>) {
    let (tx, rx) = mpsc::channel(64);
    (Arc::new(ClientChannel::new(TenantId::from(tenant), tx)), rx)
}

/// Handler context for `tenant` on a fresh runtime.
pub fn make_test_context(tenant: &str) -> (RpcContext, mpsc::Receiver<String>) {
    let runtime = make_runtime();
    let (channel, rx) = make_channel(tenant);
    (RpcContext::new(runtime, channel), rx)
}
