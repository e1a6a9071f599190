//! # switchboard
//!
//! Server binary. Loads settings, opens the presence store and serves the
//! bidirectional RPC endpoint until interrupted.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use switchboard_core::logging::{LogFormat, init_subscriber};
use switchboard_server::rpc::MethodRegistry;
use switchboard_server::{RpcRuntime, ServerConfig, SwitchboardServer};
use switchboard_settings::{StorageSettings, SwitchboardSettings};
use switchboard_store::sqlite::{self, ConnectionConfig};
use switchboard_store::{PresenceStore, SqlitePresenceStore};

const IN_MEMORY_DB: &str = ":memory:";

/// Switchboard server.
#[derive(Parser, Debug)]
#[command(name = "switchboard", about = "Bidirectional JSON-RPC switchboard")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Path to the presence database. `:memory:` keeps it in process.
    #[arg(long)]
    db_path: Option<String>,

    /// Settings file (default `~/.switchboard/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log filter directive used when `RUST_LOG` is unset.
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn apply_overrides(&self, settings: &mut SwitchboardSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(db_path) = &self.db_path {
            settings.storage.db_path.clone_from(db_path);
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.json_logs {
            settings.logging.format = LogFormat::Json;
        }
    }
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

fn open_store(storage: &StorageSettings) -> Result<Arc<dyn PresenceStore>> {
    let config = ConnectionConfig {
        pool_size: storage.pool_size,
        busy_timeout_ms: storage.busy_timeout_ms,
    };

    let pool = if storage.db_path == IN_MEMORY_DB {
        sqlite::new_in_memory(&config).context("Failed to open in-memory database")?
    } else {
        let path = switchboard_settings::expand_home(&storage.db_path);
        ensure_parent_dir(&path)?;
        let path_str = path.to_string_lossy();
        sqlite::new_file(&path_str, &config)
            .with_context(|| format!("Failed to open database: {path_str}"))?
    };

    let store = SqlitePresenceStore::open(pool).context("Failed to run presence migrations")?;
    let stale = store
        .count_connected()
        .context("Failed to read presence records")?;
    if stale > 0 {
        // No channel survives a restart; these heal on first resolve.
        tracing::info!(stale, "tenants still flagged connected from a previous run");
    }
    Ok(Arc::new(store))
}

fn build_server(settings: &SwitchboardSettings, store: Arc<dyn PresenceStore>) -> SwitchboardServer {
    let config = ServerConfig::from_settings(settings);

    let mut registry = MethodRegistry::new();
    registry.set_handler_timeout(config.handler_timeout);
    switchboard_server::rpc::handlers::register_all(&mut registry);

    let runtime = Arc::new(RpcRuntime::new(
        registry,
        store,
        config.default_call_timeout,
    ));
    SwitchboardServer::new(config, runtime)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings_file = args
        .settings
        .clone()
        .unwrap_or_else(switchboard_settings::settings_path);
    let mut settings = switchboard_settings::load_settings_from_path(&settings_file)
        .with_context(|| format!("Failed to load settings: {}", settings_file.display()))?;
    args.apply_overrides(&mut settings);

    init_subscriber(&settings.logging.level, settings.logging.format);

    let store = open_store(&settings.storage)?;
    let mut server = build_server(&settings, store);

    match switchboard_server::metrics::install_recorder() {
        Ok(handle) => server = server.with_metrics(handle),
        Err(e) => tracing::warn!(error = %e, "metrics recorder unavailable, /metrics disabled"),
    }

    let (addr, serve_handle) = server
        .listen()
        .await
        .context("Failed to bind server")?;
    let reaper = server.spawn_reaper();

    tracing::info!(
        db_path = %settings.storage.db_path,
        methods = server.runtime().registry().methods().len(),
        "switchboard listening on http://{addr}"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("shutting down");
    let report = server
        .shutdown()
        .graceful_shutdown(server.runtime(), vec![serve_handle, reaper], None)
        .await;

    tracing::info!(
        failed_calls = report.failed_calls,
        released_connections = report.released_connections,
        "shutdown complete"
    );
    Ok(())
}
