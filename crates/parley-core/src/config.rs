use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::identify::DEFAULT_SCOPES;

pub const DEFAULT_LOG_FILTER: &str = "parley=info";
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_REAP_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_LONG_LIVED_WARN_SECS: u64 = 3600;
pub const DEFAULT_CONSOLE_USER: u64 = 1;

/// Top-level config (parley.toml + PARLEY_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParleyConfig {
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub console: ConsoleConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Identifier scopes that get a session and a cosession manager.
    /// Recognised names: `position`, `user`, `unique`.
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            scopes: default_scopes(),
        }
    }
}

/// Stream and session behaviour.
///
/// There is no idle expiry unless `idle_timeout_secs` is set. Sessions open
/// longer than `long_lived_warn_secs` are logged, never closed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Attempts a conversational `get` makes before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Deadline for a conversational `get`; `None` waits forever.
    #[serde(default)]
    pub fetch_timeout_secs: Option<u64>,
    /// Close sessions that received nothing for this long.
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,
    /// Warn about sessions open at least this long; `None` disables the check.
    #[serde(default = "default_long_lived_warn_secs")]
    pub long_lived_warn_secs: Option<u64>,
    /// How often the reaper checks sessions.
    #[serde(default = "default_reap_interval_secs")]
    pub reap_interval_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            fetch_timeout_secs: None,
            idle_timeout_secs: None,
            long_lived_warn_secs: default_long_lived_warn_secs(),
            reap_interval_secs: DEFAULT_REAP_INTERVAL_SECS,
        }
    }
}

/// Console channel used by the demo binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleConfig {
    /// Bot account id stamped on events read from the console.
    #[serde(default)]
    pub self_id: u64,
    /// Sender id for bare-text (non-JSON) console lines.
    #[serde(default = "default_console_user")]
    pub user_id: u64,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            self_id: 0,
            user_id: DEFAULT_CONSOLE_USER,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// `tracing_subscriber::EnvFilter` directive used when RUST_LOG is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_scopes() -> Vec<String> {
    DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect()
}
fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}
fn default_long_lived_warn_secs() -> Option<u64> {
    Some(DEFAULT_LONG_LIVED_WARN_SECS)
}
fn default_reap_interval_secs() -> u64 {
    DEFAULT_REAP_INTERVAL_SECS
}
fn default_console_user() -> u64 {
    DEFAULT_CONSOLE_USER
}
fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

impl ParleyConfig {
    /// Load config from a TOML file with PARLEY_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ./parley.toml
    ///
    /// A missing file is not an error; every section has defaults.
    /// Nested keys use a double underscore: `PARLEY_SESSIONS__MAX_ATTEMPTS=5`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path.unwrap_or(DEFAULT_CONFIG_PATH);

        let config: ParleyConfig = Figment::from(Serialized::defaults(ParleyConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("PARLEY_").split("__"))
            .extract()
            .map_err(|e| crate::error::ParleyError::Config(e.to_string()))?;

        tracing::debug!(path, scopes = ?config.dispatcher.scopes, "config loaded");
        Ok(config)
    }
}

const DEFAULT_CONFIG_PATH: &str = "parley.toml";
