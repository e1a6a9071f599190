//! Server-initiated calls to a connected tenant.
//!
//! Each call gets a fresh id and a pending entry with a deadline. The entry
//! is resolved by whichever happens first: a matching reply from the same
//! tenant, the caller's deadline, the reaper, or shutdown. Removing the entry
//! from the pending table is the single arbitration point, so a call
//! completes exactly once.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use parking_lot::Mutex;
use serde_json::Value;
use switchboard_core::{CallId, TenantId};
use switchboard_rpc::errors::{INTERNAL_ERROR, NO_ACTIVE_CONNECTION, TIMEOUT_ERROR};
use switchboard_rpc::{Message, RpcErrorBody, encode};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics::{
    RPC_OUTBOUND_CALLS_TOTAL, RPC_OUTBOUND_DURATION_SECONDS, RPC_OUTBOUND_ERRORS_TOTAL,
    RPC_OUTBOUND_PENDING, RPC_OUTBOUND_UNMATCHED_TOTAL,
};
use crate::presence::ConnectionRegistry;

/// Why an outbound call did not produce a result.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum CallError {
    /// The tenant has no reachable channel. Nothing was sent.
    #[error("tenant {tenant_id} has no active connection")]
    NoActiveConnection {
        /// Tenant that was called.
        tenant_id: TenantId,
    },

    /// No reply arrived before the deadline.
    #[error("call to '{method}' timed out after {elapsed_ms}ms")]
    Timeout {
        /// Method that was called.
        method: String,
        /// Time between sending and giving up.
        elapsed_ms: u64,
    },

    /// The tenant answered with an error reply.
    #[error("remote error {code}: {message}")]
    Remote {
        /// Code from the error reply.
        code: i64,
        /// Message from the error reply.
        message: String,
        /// Data from the error reply.
        data: Option<Value>,
    },

    /// The channel resolved but would not accept the request.
    #[error("channel to tenant {tenant_id} is closed")]
    ChannelClosed {
        /// Tenant that was called.
        tenant_id: TenantId,
    },

    /// The server failed the call while shutting down.
    #[error("server is shutting down")]
    ShuttingDown,
}

impl CallError {
    /// Wire code equivalent of this error.
    pub fn code(&self) -> i64 {
        match self {
            Self::NoActiveConnection { .. } | Self::ChannelClosed { .. } => NO_ACTIVE_CONNECTION,
            Self::Timeout { .. } => TIMEOUT_ERROR,
            Self::Remote { code, .. } => *code,
            Self::ShuttingDown => INTERNAL_ERROR,
        }
    }

    /// Whether the tenant could not be reached at all.
    ///
    /// Callers that treat tenant features as optional should degrade on
    /// these rather than fail.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            Self::NoActiveConnection { .. } | Self::Timeout { .. } | Self::ChannelClosed { .. }
        )
    }

    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoActiveConnection { .. } => "no_active_connection",
            Self::Timeout { .. } => "timeout",
            Self::Remote { .. } => "remote",
            Self::ChannelClosed { .. } => "channel_closed",
            Self::ShuttingDown => "shutting_down",
        }
    }

    /// Wire-format error body.
    pub fn to_error_body(&self) -> RpcErrorBody {
        match self {
            Self::Remote {
                code,
                message,
                data,
            } => RpcErrorBody {
                code: *code,
                message: message.clone(),
                data: data.clone(),
            },
            other => RpcErrorBody {
                code: other.code(),
                message: other.to_string(),
                data: None,
            },
        }
    }
}

type CallOutcome = Result<Value, CallError>;

struct PendingCall {
    tenant_id: TenantId,
    method: String,
    created_at: Instant,
    expires_at: Instant,
    tx: oneshot::Sender<CallOutcome>,
}

impl PendingCall {
    fn elapsed_ms(&self) -> u64 {
        millis(self.created_at.elapsed())
    }
}

/// Pending-call table plus the connection registry used to reach tenants.
pub struct OutboundCalls {
    connections: Arc<ConnectionRegistry>,
    pending: Mutex<HashMap<CallId, PendingCall>>,
    default_timeout: Duration,
}

impl OutboundCalls {
    /// Create an empty table.
    pub fn new(connections: Arc<ConnectionRegistry>, default_timeout: Duration) -> Self {
        Self {
            connections,
            pending: Mutex::new(HashMap::new()),
            default_timeout,
        }
    }

    /// Timeout used by [`call_default`](Self::call_default).
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Call `method` on `tenant_id` and wait for its reply.
    pub async fn call(
        &self,
        tenant_id: &TenantId,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, CallError> {
        counter!(RPC_OUTBOUND_CALLS_TOTAL, "method" => method.to_owned()).increment(1);
        let start = Instant::now();

        let outcome = self.call_inner(tenant_id, method, params, timeout).await;

        histogram!(RPC_OUTBOUND_DURATION_SECONDS, "method" => method.to_owned())
            .record(start.elapsed().as_secs_f64());
        if let Err(e) = &outcome {
            counter!(RPC_OUTBOUND_ERRORS_TOTAL, "method" => method.to_owned(), "error_type" => e.kind())
                .increment(1);
            debug!(%tenant_id, method, error = %e, "outbound call failed");
        }
        outcome
    }

    /// [`call`](Self::call) with the configured default timeout.
    pub async fn call_default(
        &self,
        tenant_id: &TenantId,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, CallError> {
        self.call(tenant_id, method, params, self.default_timeout)
            .await
    }

    async fn call_inner(
        &self,
        tenant_id: &TenantId,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, CallError> {
        let Some(channel) = self.connections.resolve_channel(tenant_id).await else {
            return Err(CallError::NoActiveConnection {
                tenant_id: tenant_id.clone(),
            });
        };

        let call_id = CallId::new();
        let created_at = Instant::now();
        let expires_at = deadline(created_at, timeout);
        let (tx, mut rx) = oneshot::channel();
        self.insert(
            call_id.clone(),
            PendingCall {
                tenant_id: tenant_id.clone(),
                method: method.to_owned(),
                created_at,
                expires_at,
                tx,
            },
        );

        let payload = encode(&Message::request(call_id.clone(), method, params));
        if !channel.send(payload) {
            let _ = self.take(&call_id);
            return Err(CallError::ChannelClosed {
                tenant_id: tenant_id.clone(),
            });
        }
        debug!(%tenant_id, %call_id, method, channel_ref = %channel.channel_ref(), "outbound call sent");

        match tokio::time::timeout_at(expires_at, &mut rx).await {
            Ok(Ok(outcome)) => outcome,
            // Every path that removes an entry sends on it first.
            Ok(Err(_)) => Err(CallError::ShuttingDown),
            Err(_) => {
                if self.take(&call_id).is_some() {
                    warn!(%tenant_id, %call_id, method, "outbound call timed out");
                    Err(CallError::Timeout {
                        method: method.to_owned(),
                        elapsed_ms: millis(created_at.elapsed()),
                    })
                } else {
                    // Someone else won the removal; their outcome is in flight.
                    rx.await.unwrap_or(Err(CallError::ShuttingDown))
                }
            }
        }
    }

    /// Route a reply from `tenant_id` to its pending call.
    ///
    /// Returns `false` when the reply matched nothing: unknown or late ids,
    /// ids owned by another tenant, and non-reply messages are discarded.
    pub fn resolve(&self, tenant_id: &TenantId, message: Message) -> bool {
        let (id, outcome) = match message {
            Message::Response(r) => (r.id, Ok(r.result)),
            Message::Error(e) => (
                e.id,
                Err(CallError::Remote {
                    code: e.error.code,
                    message: e.error.message,
                    data: e.error.data,
                }),
            ),
            Message::Request(_) => return false,
        };

        let Some(call_id) = id.as_str().map(CallId::from) else {
            counter!(RPC_OUTBOUND_UNMATCHED_TOTAL).increment(1);
            debug!(%tenant_id, %id, "reply with non-string id discarded");
            return false;
        };

        let pending = {
            let mut map = self.pending.lock();
            let owner_matches = map.get(&call_id).map(|p| &p.tenant_id == tenant_id);
            match owner_matches {
                Some(true) => {
                    let taken = map.remove(&call_id);
                    set_pending_gauge(map.len());
                    taken
                }
                Some(false) => {
                    drop(map);
                    counter!(RPC_OUTBOUND_UNMATCHED_TOTAL).increment(1);
                    warn!(%tenant_id, %call_id, "reply from wrong tenant discarded");
                    return false;
                }
                None => None,
            }
        };

        let Some(pending) = pending else {
            counter!(RPC_OUTBOUND_UNMATCHED_TOTAL).increment(1);
            debug!(%tenant_id, %call_id, "late or unknown reply discarded");
            return false;
        };

        debug!(
            %tenant_id,
            %call_id,
            method = %pending.method,
            elapsed_ms = pending.elapsed_ms(),
            ok = outcome.is_ok(),
            "outbound call resolved"
        );
        // The caller may have been dropped; that is fine.
        let _ = pending.tx.send(outcome);
        true
    }

    /// Fail every entry whose deadline is at or before `now`.
    ///
    /// Catches calls whose caller dropped the future before its own timer
    /// fired. Returns how many entries were removed.
    pub fn sweep_expired(&self, now: Instant) -> usize {
        let expired: Vec<(CallId, PendingCall)> = {
            let mut map = self.pending.lock();
            let ids: Vec<CallId> = map
                .iter()
                .filter(|(_, p)| p.expires_at <= now)
                .map(|(id, _)| id.clone())
                .collect();
            let taken = ids
                .into_iter()
                .filter_map(|id| map.remove(&id).map(|p| (id, p)))
                .collect();
            set_pending_gauge(map.len());
            taken
        };

        let count = expired.len();
        for (call_id, pending) in expired {
            let elapsed_ms = pending.elapsed_ms();
            debug!(tenant_id = %pending.tenant_id, %call_id, method = %pending.method, elapsed_ms, "reaped expired call");
            let _ = pending.tx.send(Err(CallError::Timeout {
                method: pending.method,
                elapsed_ms,
            }));
        }
        count
    }

    /// Periodically run [`sweep_expired`](Self::sweep_expired) until
    /// `cancel` fires.
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let calls = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately.
            let _ = ticker.tick().await;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let reaped = calls.sweep_expired(Instant::now());
                        if reaped > 0 {
                            info!(reaped, "reaped expired outbound calls");
                        }
                    }
                }
            }
            debug!("outbound call reaper stopped");
        })
    }

    /// Fail every pending call with [`CallError::ShuttingDown`].
    pub fn fail_all(&self) -> usize {
        let drained: Vec<PendingCall> = {
            let mut map = self.pending.lock();
            let drained = map.drain().map(|(_, p)| p).collect();
            set_pending_gauge(0);
            drained
        };
        let count = drained.len();
        for pending in drained {
            let _ = pending.tx.send(Err(CallError::ShuttingDown));
        }
        if count > 0 {
            info!(count, "failed pending outbound calls on shutdown");
        }
        count
    }

    /// Number of calls awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    fn insert(&self, call_id: CallId, call: PendingCall) {
        let mut map = self.pending.lock();
        let _ = map.insert(call_id, call);
        set_pending_gauge(map.len());
    }

    fn take(&self, call_id: &CallId) -> Option<PendingCall> {
        let mut map = self.pending.lock();
        let taken = map.remove(call_id);
        set_pending_gauge(map.len());
        taken
    }
}

impl std::fmt::Debug for OutboundCalls {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundCalls")
            .field("pending", &self.pending_count())
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}

/// Deadlines past this horizon are clamped to it.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `start + timeout`, saturating at [`FAR_FUTURE`] instead of overflowing.
fn deadline(start: Instant, timeout: Duration) -> Instant {
    start
        .checked_add(timeout.min(FAR_FUTURE))
        .unwrap_or_else(|| start + FAR_FUTURE)
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[allow(clippy::cast_precision_loss)]
fn set_pending_gauge(len: usize) {
    gauge!(RPC_OUTBOUND_PENDING).set(len as f64);
}
