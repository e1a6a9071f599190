//! Process-local duplex channel to one connected tenant.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use switchboard_core::{ChannelRef, TenantId};
use switchboard_rpc::{Message, encode};
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Lifecycle events of one channel, consumed by the dispatcher loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The transport finished its handshake.
    Connected,
    /// One raw text payload arrived.
    MessageReceived(String),
    /// The transport closed.
    Disconnected,
}

/// Handle to a live tenant connection.
///
/// Outbound payloads go into a bounded queue drained by the socket writer, so
/// [`send`](Self::send) never awaits.
pub struct ClientChannel {
    channel_ref: ChannelRef,
    tenant_id: TenantId,
    tx: mpsc::Sender<String>,
    connected_at: Instant,
    is_alive: AtomicBool,
    last_pong: Mutex<Instant>,
    dropped_messages: AtomicU64,
}

impl ClientChannel {
    /// Create a channel with a freshly minted reference.
    pub fn new(tenant_id: TenantId, tx: mpsc::Sender<String>) -> Self {
        Self::with_ref(ChannelRef::new(), tenant_id, tx)
    }

    /// Create a channel with a known reference.
    pub fn with_ref(channel_ref: ChannelRef, tenant_id: TenantId, tx: mpsc::Sender<String>) -> Self {
        let now = Instant::now();
        Self {
            channel_ref,
            tenant_id,
            tx,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Opaque reference shared with the durable presence record.
    pub fn channel_ref(&self) -> &ChannelRef {
        &self.channel_ref
    }

    /// Tenant this channel belongs to.
    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    /// Queue a raw payload for the writer.
    ///
    /// Returns `false` if the queue is full or the writer is gone, and
    /// increments the dropped message counter.
    pub fn send(&self, payload: String) -> bool {
        if self.tx.try_send(payload).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Encode and queue an envelope.
    pub fn send_message(&self, message: &Message) -> bool {
        self.send(encode(message))
    }

    /// Whether the writer side has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Total payloads dropped for this channel.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Record inbound activity (pong or any frame).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Time since the last recorded activity.
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Read and reset the alive flag.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Channel age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for ClientChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientChannel")
            .field("channel_ref", &self.channel_ref)
            .field("tenant_id", &self.tenant_id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
