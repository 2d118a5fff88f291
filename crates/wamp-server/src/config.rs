//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`WampSettings::default()`]
//! 2. If `~/.wampd/settings.json` (or an explicit path) exists, deep-merge it over the defaults
//! 3. Apply `WAMPD_*` environment variable overrides
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse settings JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
}

pub type Result<T> = std::result::Result<T, SettingsError>;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WampSettings {
    pub server: ServerSettings,
    pub client: ClientSettings,
    pub storage: StorageSettings,
    pub ping: PingSettings,
    pub routes: Vec<RouteSettings>,
    pub broadcast: BroadcastSettings,
    /// Static token table for the query-string token provider.
    pub tokens: HashMap<String, TokenSettings>,
    pub log_level: String,
}

impl Default for WampSettings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            client: ClientSettings::default(),
            storage: StorageSettings::default(),
            ping: PingSettings::default(),
            routes: vec![
                RouteSettings {
                    name: "chat".into(),
                    pattern: "chat/{room}".into(),
                    handler: "broadcast".into(),
                    requirements: HashMap::new(),
                },
                RouteSettings {
                    name: "presence".into(),
                    pattern: "rpc/presence".into(),
                    handler: "presence".into(),
                    requirements: HashMap::new(),
                },
            ],
            broadcast: BroadcastSettings::default(),
            tokens: HashMap::new(),
            log_level: "info".into(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Outbound frames buffered per connection before new ones are dropped.
    pub max_send_queue: usize,
    pub keepalive_interval_secs: u64,
    /// Enables periodic memory usage reports.
    pub profile: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
            max_send_queue: 256,
            keepalive_interval_secs: 30,
            profile: false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Lifetime of a cached identity token. `0` keeps tokens until disconnect.
    pub ttl_secs: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self { ttl_secs: 900 }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    pub driver: StorageKind,
    /// SQLite file, relative paths resolve against `~/.wampd`.
    pub path: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            driver: StorageKind::Memory,
            path: "clients.db".into(),
        }
    }
}

impl StorageSettings {
    pub fn resolved_path(&self) -> PathBuf {
        let path = PathBuf::from(&self.path);
        if path.is_absolute() {
            path
        } else {
            home_dir().join(path)
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PingSettings {
    pub interval_secs: u64,
}

impl Default for PingSettings {
    fn default() -> Self {
        Self { interval_secs: 20 }
    }
}

/// Options for the built-in `broadcast` topic handler.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BroadcastSettings {
    /// Subscribers must hold one of these roles. Empty admits everyone.
    pub required_roles: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteSettings {
    pub name: String,
    pub pattern: String,
    pub handler: String,
    #[serde(default)]
    pub requirements: HashMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenSettings {
    pub username: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

fn home_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".wampd")
}

/// Resolve the path to the settings file (`~/.wampd/settings.json`).
pub fn settings_path() -> PathBuf {
    home_dir().join("settings.json")
}

pub fn load_settings() -> Result<WampSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<WampSettings> {
    let mut settings = merge_file(path)?;
    apply_overrides(&mut settings, |name| std::env::var(name).ok());
    settings.validate()?;
    Ok(settings)
}

fn merge_file(path: &Path) -> Result<WampSettings> {
    let defaults = serde_json::to_value(WampSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

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
                target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `WAMPD_*` overrides read through `lookup`. Invalid values are
/// ignored with a warning.
pub fn apply_overrides<F>(settings: &mut WampSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = read("WAMPD_HOST") {
        settings.server.host = v;
    }
    if let Some(raw) = read("WAMPD_PORT") {
        match parse_u16_range(&raw, 1, 65535) {
            Some(port) => settings.server.port = port,
            None => tracing::warn!(key = "WAMPD_PORT", value = %raw, "invalid port env var, ignoring"),
        }
    }
    if let Some(raw) = read("WAMPD_CLIENT_TTL") {
        match parse_u64_range(&raw, 0, 31_536_000) {
            Some(ttl) => settings.client.ttl_secs = ttl,
            None => tracing::warn!(key = "WAMPD_CLIENT_TTL", value = %raw, "invalid ttl env var, ignoring"),
        }
    }
    if let Some(raw) = read("WAMPD_PROFILE") {
        match parse_bool(&raw) {
            Some(flag) => settings.server.profile = flag,
            None => tracing::warn!(key = "WAMPD_PROFILE", value = %raw, "invalid boolean env var, ignoring"),
        }
    }
    if let Some(path) = read("WAMPD_STORAGE_PATH") {
        settings.storage.driver = StorageKind::Sqlite;
        settings.storage.path = path;
    }
}

/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

impl WampSettings {
    pub fn validate(&self) -> Result<()> {
        if self.server.max_send_queue == 0 {
            return Err(SettingsError::InvalidValue("server.maxSendQueue must be positive".into()));
        }
        if self.ping.interval_secs == 0 {
            return Err(SettingsError::InvalidValue("ping.intervalSecs must be positive".into()));
        }
        for route in &self.routes {
            if route.name.is_empty() || route.pattern.is_empty() || route.handler.is_empty() {
                return Err(SettingsError::InvalidValue(format!(
                    "route {:?} needs a name, pattern and handler",
                    route.name
                )));
            }
        }
        Ok(())
    }

    /// Cache TTL, `None` when tokens live until disconnect.
    pub fn client_ttl(&self) -> Option<std::time::Duration> {
        (self.client.ttl_secs > 0).then(|| std::time::Duration::from_secs(self.client.ttl_secs))
    }
}
