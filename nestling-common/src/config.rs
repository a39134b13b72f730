//! Configuration loading
//!
//! Resolution priority for every setting:
//! 1. Environment variable (`NESTLING_*`)
//! 2. TOML config file (`<config dir>/nestling/config.toml`)
//! 3. Compiled default
//!
//! A missing or unreadable config file is never fatal; the loader logs
//! a warning and continues with defaults.

use std::path::PathBuf;

use serde::Deserialize;
use tracing::warn;

/// Default bounded timeout for the authoritative stage-update path
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 25_000;
/// Default interval for the background fallback poll
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 45;
/// Default interval for watching the cross-tab broadcast marker
pub const DEFAULT_CHANNEL_POLL_MS: u64 = 500;
/// Default total budget for background retry of a failed stage update
pub const DEFAULT_RETRY_MAX_WAIT_MS: u64 = 120_000;

/// Resolved runtime configuration for the sync core
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the backend collaborators
    pub base_url: String,
    /// Language for development content requests and cache keys
    pub language: String,
    /// Session scope used in the pregnancy cache key
    pub session_scope: String,
    /// Timeout applied to each remote call, in milliseconds
    pub request_timeout_ms: u64,
    /// Background fallback poll interval, in seconds
    pub poll_interval_secs: u64,
    /// Cross-tab marker watch interval, in milliseconds
    pub channel_poll_ms: u64,
    /// Total time budget for the background stage-update replay
    pub retry_max_wait_ms: u64,
    /// Directory holding the persisted cache and broadcast marker;
    /// shared by every tab of the same user
    pub data_dir: PathBuf,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080/api".to_string(),
            language: "en".to_string(),
            session_scope: "local".to_string(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            channel_poll_ms: DEFAULT_CHANNEL_POLL_MS,
            retry_max_wait_ms: DEFAULT_RETRY_MAX_WAIT_MS,
            data_dir: default_data_dir(),
        }
    }
}

/// Partial settings as they appear in the TOML file
#[derive(Debug, Default, Deserialize)]
struct TomlConfig {
    base_url: Option<String>,
    language: Option<String>,
    session_scope: Option<String>,
    request_timeout_ms: Option<u64>,
    poll_interval_secs: Option<u64>,
    channel_poll_ms: Option<u64>,
    retry_max_wait_ms: Option<u64>,
    data_dir: Option<PathBuf>,
}

impl SyncConfig {
    /// Load configuration following the env > TOML > default priority
    pub fn load() -> Self {
        Self::load_from(read_toml_config())
    }

    fn load_from(file: TomlConfig) -> Self {
        let defaults = Self::default();

        Self {
            base_url: env_string("NESTLING_BASE_URL")
                .or(file.base_url)
                .unwrap_or(defaults.base_url),
            language: env_string("NESTLING_LANGUAGE")
                .or(file.language)
                .unwrap_or(defaults.language),
            session_scope: env_string("NESTLING_SESSION_SCOPE")
                .or(file.session_scope)
                .unwrap_or(defaults.session_scope),
            request_timeout_ms: env_u64("NESTLING_REQUEST_TIMEOUT_MS")
                .or(file.request_timeout_ms)
                .unwrap_or(defaults.request_timeout_ms),
            poll_interval_secs: env_u64("NESTLING_POLL_INTERVAL_SECS")
                .or(file.poll_interval_secs)
                .unwrap_or(defaults.poll_interval_secs),
            channel_poll_ms: env_u64("NESTLING_CHANNEL_POLL_MS")
                .or(file.channel_poll_ms)
                .unwrap_or(defaults.channel_poll_ms),
            retry_max_wait_ms: env_u64("NESTLING_RETRY_MAX_WAIT_MS")
                .or(file.retry_max_wait_ms)
                .unwrap_or(defaults.retry_max_wait_ms),
            data_dir: env_string("NESTLING_DATA_DIR")
                .map(PathBuf::from)
                .or(file.data_dir)
                .unwrap_or(defaults.data_dir),
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_u64(name: &str) -> Option<u64> {
    let raw = env_string(name)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(var = name, value = %raw, "Ignoring non-numeric environment override");
            None
        }
    }
}

/// Platform config file location: `<config dir>/nestling/config.toml`
fn config_file_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("nestling").join("config.toml"))
}

fn read_toml_config() -> TomlConfig {
    let Some(path) = config_file_path() else {
        return TomlConfig::default();
    };
    if !path.exists() {
        return TomlConfig::default();
    }
    match std::fs::read_to_string(&path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Malformed config file, using defaults");
                TomlConfig::default()
            }
        },
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Could not read config file, using defaults");
            TomlConfig::default()
        }
    }
}

/// OS-dependent default data directory for cache and broadcast marker
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("nestling"))
        .unwrap_or_else(|| PathBuf::from("./nestling_data"))
}
