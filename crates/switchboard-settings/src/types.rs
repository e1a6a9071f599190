//! Settings types.
//!
//! Every struct uses `#[serde(rename_all = "camelCase", default)]` so a user
//! file only needs the keys it overrides.

use serde::{Deserialize, Serialize};
use switchboard_core::logging::LogFormat;

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SwitchboardSettings {
    /// HTTP and WebSocket listener.
    pub server: ServerSettings,
    /// Inbound dispatch and outbound call timing.
    pub rpc: RpcSettings,
    /// Presence store.
    pub storage: StorageSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

/// Listener and transport settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (0 picks an ephemeral port).
    pub port: u16,
    /// Header carrying the authenticated tenant id on the upgrade request.
    pub tenant_header: String,
    /// Maximum inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Interval between WebSocket pings.
    pub heartbeat_interval_ms: u64,
    /// A session with no pong for this long is closed.
    pub heartbeat_timeout_ms: u64,
    /// Maximum number of concurrent sessions.
    pub max_connections: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8090,
            tenant_header: "x-tenant-id".to_string(),
            max_message_size: 16 * 1024 * 1024,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 90_000,
            max_connections: 1024,
        }
    }
}

/// RPC timing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RpcSettings {
    /// Timeout applied by `call_default`.
    pub default_call_timeout_ms: u64,
    /// Upper bound on a single inbound handler invocation.
    pub handler_timeout_ms: u64,
    /// How often abandoned pending calls are swept.
    pub reaper_interval_ms: u64,
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            default_call_timeout_ms: 30_000,
            handler_timeout_ms: 60_000,
            reaper_interval_ms: 5_000,
        }
    }
}

/// Presence store settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    /// SQLite file path. `:memory:` selects an in-memory database.
    pub db_path: String,
    /// Maximum pooled connections.
    pub pool_size: u32,
    /// `SQLite` busy timeout.
    pub busy_timeout_ms: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            db_path: "~/.switchboard/presence.db".to_string(),
            pool_size: 4,
            busy_timeout_ms: 5_000,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}
