//! WebSocket session lifecycle, from upgrade through disconnect.
//!
//! The session owns the socket. It feeds inbound frames to the dispatcher as
//! [`ChannelEvent`]s and drains the channel's send queue into the socket.
//! Any of the following ends the session: the client closes, the heartbeat
//! times out, the dispatcher stops, or the server shuts down.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use switchboard_core::TenantId;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::heartbeat::{HeartbeatResult, run_heartbeat};
use crate::channel::{ChannelEvent, ClientChannel};
use crate::config::ServerConfig;
use crate::dispatcher::run_dispatcher;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};
use crate::runtime::RpcRuntime;

/// Outbound payloads buffered per channel before sends start failing.
const SEND_QUEUE_CAPACITY: usize = 1024;

/// Inbound events buffered between the reader and the dispatcher.
const EVENT_QUEUE_CAPACITY: usize = 256;

/// Per-session timing knobs.
#[derive(Clone, Copy, Debug)]
pub struct SessionConfig {
    /// Interval between server pings.
    pub heartbeat_interval: Duration,
    /// Close the session after this long without any inbound frame.
    pub heartbeat_timeout: Duration,
}

impl From<&ServerConfig> for SessionConfig {
    fn from(config: &ServerConfig) -> Self {
        Self {
            heartbeat_interval: config.heartbeat_interval,
            heartbeat_timeout: config.heartbeat_timeout,
        }
    }
}

/// Run one tenant's WebSocket session to completion.
#[instrument(skip_all, fields(tenant_id = %tenant_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    tenant_id: TenantId,
    runtime: Arc<RpcRuntime>,
    config: SessionConfig,
    shutdown: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (send_tx, mut send_rx) = mpsc::channel::<String>(SEND_QUEUE_CAPACITY);
    let channel = Arc::new(ClientChannel::new(tenant_id, send_tx));
    let session = shutdown.child_token();

    info!(channel_ref = %channel.channel_ref(), "session opened");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let (event_tx, event_rx) = mpsc::channel::<ChannelEvent>(EVENT_QUEUE_CAPACITY);
    let dispatcher = {
        let runtime = Arc::clone(&runtime);
        let channel = Arc::clone(&channel);
        let session = session.clone();
        tokio::spawn(async move {
            let exit = run_dispatcher(runtime, channel, event_rx).await;
            session.cancel();
            exit
        })
    };
    let _ = event_tx.send(ChannelEvent::Connected).await;

    // Writer: send queue and periodic pings.
    let writer = {
        let session = session.clone();
        let interval = config.heartbeat_interval;
        tokio::spawn(async move {
            let mut ping = tokio::time::interval(interval);
            let _ = ping.tick().await;
            loop {
                tokio::select! {
                    msg = send_rx.recv() => {
                        let Some(text) = msg else { break };
                        if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    _ = ping.tick() => {
                        if ws_tx.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                            break;
                        }
                    }
                    () = session.cancelled() => {
                        let _ = ws_tx.send(WsMessage::Close(None)).await;
                        break;
                    }
                }
            }
            session.cancel();
        })
    };

    let heartbeat = {
        let session = session.clone();
        let channel = Arc::clone(&channel);
        tokio::spawn(async move {
            let result = run_heartbeat(
                channel,
                config.heartbeat_interval,
                config.heartbeat_timeout,
                session.clone(),
            )
            .await;
            if result == HeartbeatResult::TimedOut {
                warn!(timeout = ?config.heartbeat_timeout, "client unresponsive, closing session");
                session.cancel();
            }
        })
    };

    // Reader.
    loop {
        let frame = tokio::select! {
            () = session.cancelled() => break,
            frame = ws_rx.next() => frame,
        };
        let msg = match frame {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                debug!(error = %e, "websocket read failed");
                break;
            }
            None => break,
        };
        channel.mark_alive();

        let text = match msg {
            WsMessage::Text(t) => t.to_string(),
            WsMessage::Binary(data) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s,
                Err(_) => {
                    info!(len = data.len(), "non-UTF8 binary frame ignored");
                    continue;
                }
            },
            WsMessage::Close(_) => {
                debug!("client sent close frame");
                break;
            }
            WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
        };

        if event_tx.send(ChannelEvent::MessageReceived(text)).await.is_err() {
            break;
        }
    }

    session.cancel();
    let _ = event_tx.send(ChannelEvent::Disconnected).await;
    drop(event_tx);
    match dispatcher.await {
        Ok(exit) => debug!(?exit, "dispatcher finished"),
        Err(e) => warn!(error = %e, "dispatcher task failed"),
    }
    let _ = writer.await;
    let _ = heartbeat.await;

    info!(
        channel_ref = %channel.channel_ref(),
        dropped = channel.drop_count(),
        "session closed"
    );
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(channel.age().as_secs_f64());
}
