//! Server configuration.

use std::time::Duration;

use switchboard_settings::SwitchboardSettings;

/// Runtime configuration for [`SwitchboardServer`](crate::server::SwitchboardServer).
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Upgrade request header carrying the tenant id (lowercase).
    pub tenant_header: String,
    /// Maximum concurrent WebSocket sessions.
    pub max_connections: usize,
    /// Interval between server pings.
    pub heartbeat_interval: Duration,
    /// Close a session that has not answered a ping for this long.
    pub heartbeat_timeout: Duration,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Timeout used by `call_default` and the HTTP call route.
    pub default_call_timeout: Duration,
    /// Upper bound on one inbound handler invocation.
    pub handler_timeout: Duration,
    /// Interval of the abandoned-call sweep.
    pub reaper_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            tenant_header: "x-tenant-id".into(),
            max_connections: 1024,
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(90),
            max_message_size: 16 * 1024 * 1024,
            default_call_timeout: Duration::from_secs(30),
            handler_timeout: Duration::from_secs(60),
            reaper_interval: Duration::from_secs(5),
        }
    }
}

impl ServerConfig {
    /// Derive the server configuration from loaded settings.
    pub fn from_settings(settings: &SwitchboardSettings) -> Self {
        let server = &settings.server;
        let rpc = &settings.rpc;
        Self {
            host: server.host.clone(),
            port: server.port,
            tenant_header: server.tenant_header.to_ascii_lowercase(),
            max_connections: server.max_connections,
            heartbeat_interval: Duration::from_millis(server.heartbeat_interval_ms),
            heartbeat_timeout: Duration::from_millis(server.heartbeat_timeout_ms),
            max_message_size: server.max_message_size,
            default_call_timeout: Duration::from_millis(rpc.default_call_timeout_ms),
            handler_timeout: Duration::from_millis(rpc.handler_timeout_ms),
            reaper_interval: Duration::from_millis(rpc.reaper_interval_ms),
        }
    }
}
