//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`SwitchboardSettings::default()`]
//! 2. If the settings file exists, deep-merge user values over defaults
//! 3. Apply `SWITCHBOARD_*` environment overrides (highest priority)
//!
//! Objects merge recursively, arrays and primitives are replaced, and null
//! values in the file leave the default in place.

use std::path::{Path, PathBuf};

use serde_json::Value;
use switchboard_core::logging::LogFormat;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::SwitchboardSettings;

/// Resolve the path to the settings file (`~/.switchboard/settings.json`).
pub fn settings_path() -> PathBuf {
    switchboard_home().join("settings.json")
}

/// `~/.switchboard`, falling back to `/tmp` when `HOME` is unset.
pub fn switchboard_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".switchboard")
}

/// Expand a leading `~/` against `HOME`.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(rest)
        }
        None => PathBuf::from(path),
    }
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or values that fail
/// validation are errors.
pub fn load_settings_from_path(path: &Path) -> Result<SwitchboardSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

fn load_file_layer(path: &Path) -> Result<SwitchboardSettings> {
    let defaults = serde_json::to_value(SwitchboardSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values (source wins).
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Reject values that would make the server unusable.
pub fn validate(settings: &SwitchboardSettings) -> Result<()> {
    if settings.rpc.default_call_timeout_ms == 0 {
        return Err(SettingsError::InvalidValue(
            "rpc.defaultCallTimeoutMs must be > 0".into(),
        ));
    }
    if settings.rpc.handler_timeout_ms == 0 {
        return Err(SettingsError::InvalidValue(
            "rpc.handlerTimeoutMs must be > 0".into(),
        ));
    }
    if settings.rpc.reaper_interval_ms == 0 {
        return Err(SettingsError::InvalidValue(
            "rpc.reaperIntervalMs must be > 0".into(),
        ));
    }
    if settings.server.tenant_header.trim().is_empty() {
        return Err(SettingsError::InvalidValue(
            "server.tenantHeader must not be empty".into(),
        ));
    }
    if settings.server.heartbeat_timeout_ms < settings.server.heartbeat_interval_ms {
        return Err(SettingsError::InvalidValue(
            "server.heartbeatTimeoutMs must be >= heartbeatIntervalMs".into(),
        ));
    }
    if settings.storage.pool_size == 0 {
        return Err(SettingsError::InvalidValue(
            "storage.poolSize must be > 0".into(),
        ));
    }
    Ok(())
}

/// Apply `SWITCHBOARD_*` environment overrides. Invalid values are logged and
/// ignored.
pub fn apply_env_overrides(settings: &mut SwitchboardSettings) {
    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read_env_string("SWITCHBOARD_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_u16("SWITCHBOARD_PORT", 0, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = read_env_string("SWITCHBOARD_TENANT_HEADER") {
        settings.server.tenant_header = v.to_ascii_lowercase();
    }
    if let Some(v) = read_env_usize("SWITCHBOARD_MAX_CONNECTIONS", 1, 1_000_000) {
        settings.server.max_connections = v;
    }

    // ── RPC ─────────────────────────────────────────────────────────
    if let Some(v) = read_env_u64("SWITCHBOARD_CALL_TIMEOUT_MS", 1, 3_600_000) {
        settings.rpc.default_call_timeout_ms = v;
    }
    if let Some(v) = read_env_u64("SWITCHBOARD_HANDLER_TIMEOUT_MS", 1, 3_600_000) {
        settings.rpc.handler_timeout_ms = v;
    }

    // ── Storage ─────────────────────────────────────────────────────
    if let Some(v) = read_env_string("SWITCHBOARD_DB_PATH") {
        settings.storage.db_path = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read_env_string("SWITCHBOARD_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_string("SWITCHBOARD_LOG_FORMAT") {
        match LogFormat::parse(&v) {
            Some(format) => settings.logging.format = format,
            None => warn!(key = "SWITCHBOARD_LOG_FORMAT", value = %v, "invalid log format env var, ignoring"),
        }
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

// ── Env var readers ─────────────────────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
