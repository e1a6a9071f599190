//! Per-channel event loop.
//!
//! The transport turns socket activity into [`ChannelEvent`]s; this loop
//! turns them into presence updates, inbound dispatches and outbound call
//! resolutions. A malformed payload is logged and dropped without touching
//! the loop.

use std::sync::Arc;

use metrics::counter;
use switchboard_rpc::{Message, decode};
use tokio::sync::mpsc;
use tracing::{debug, error, instrument, warn};

use crate::channel::{ChannelEvent, ClientChannel};
use crate::metrics::RPC_PARSE_ERRORS_TOTAL;
use crate::runtime::RpcRuntime;

/// Why the dispatcher loop returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatcherExit {
    /// A `Disconnected` event arrived.
    Disconnected,
    /// The event stream closed without `Disconnected`.
    StreamEnded,
    /// The channel could not be registered.
    RegisterFailed,
}

/// Consume `events` for `channel` until it disconnects.
///
/// If the channel was registered it is unregistered on every exit path.
#[instrument(skip_all, fields(tenant_id = %channel.tenant_id(), channel_ref = %channel.channel_ref()))]
pub async fn run_dispatcher(
    runtime: Arc<RpcRuntime>,
    channel: Arc<ClientChannel>,
    mut events: mpsc::Receiver<ChannelEvent>,
) -> DispatcherExit {
    let mut registered = false;

    let exit = loop {
        let Some(event) = events.recv().await else {
            break DispatcherExit::StreamEnded;
        };
        match event {
            ChannelEvent::Connected => {
                if registered {
                    debug!("duplicate connected event ignored");
                    continue;
                }
                match runtime.connections().register_connection(Arc::clone(&channel)).await {
                    Ok(_) => registered = true,
                    Err(e) => {
                        error!(error = %e, "failed to register channel");
                        break DispatcherExit::RegisterFailed;
                    }
                }
            }
            ChannelEvent::MessageReceived(raw) => handle_payload(&runtime, &channel, &raw),
            ChannelEvent::Disconnected => break DispatcherExit::Disconnected,
        }
    };

    if registered {
        if let Err(e) = runtime
            .connections()
            .unregister_connection(channel.tenant_id(), channel.channel_ref())
            .await
        {
            warn!(error = %e, "failed to unregister channel");
        }
    }
    debug!(?exit, "dispatcher stopped");
    exit
}

fn handle_payload(runtime: &Arc<RpcRuntime>, channel: &Arc<ClientChannel>, raw: &str) {
    let message = match decode(raw) {
        Ok(message) => message,
        Err(e) => {
            counter!(RPC_PARSE_ERRORS_TOTAL).increment(1);
            warn!(error = %e, len = raw.len(), "malformed message dropped");
            return;
        }
    };

    match message {
        Message::Request(request) => {
            // Handlers may call back into this tenant, whose reply arrives
            // on this same loop.
            let ctx = runtime.context(Arc::clone(channel));
            let runtime = Arc::clone(runtime);
            let _ = tokio::spawn(async move {
                let reply = runtime.registry().dispatch(request, &ctx).await;
                if !ctx.channel.send_message(&reply) {
                    debug!(id = %reply.id(), "reply dropped, channel closed or full");
                }
            });
        }
        reply => {
            let _ = runtime.calls().resolve(channel.tenant_id(), reply);
        }
    }
}
