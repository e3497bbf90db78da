//! Client-side configuration loading for the sync core.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the client looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/sync.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "KWIZ_SYNC_CONFIG_PATH";

const DEFAULT_WS_URL: &str = "ws://localhost:8080/ws";
const DEFAULT_API_BASE_URL: &str = "http://localhost:8080/api";
/// Mutual keep-alive interval negotiated with the server.
const DEFAULT_HEARTBEAT_MS: u64 = 4000;
/// Fixed delay before rebuilding a dropped connection.
const DEFAULT_RECONNECT_DELAY_MS: u64 = 5000;
const DEFAULT_FRAME_CAPACITY: usize = 64;
const DEFAULT_TOPIC_CAPACITY: usize = 16;

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the sync core.
pub struct SyncConfig {
    /// WebSocket endpoint of the quiz server.
    pub ws_url: String,
    /// Base URL of the quiz REST API.
    pub api_base_url: String,
    /// Interval between outgoing heartbeat pings.
    pub heartbeat_interval: Duration,
    /// Fixed delay between reconnect attempts after an unexpected close.
    pub reconnect_delay: Duration,
    /// Capacity of the raw inbound frame hub.
    pub frame_capacity: usize,
    /// Capacity of each per-topic broadcast channel.
    pub topic_capacity: usize,
}

impl SyncConfig {
    /// Load the configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        ws_url = %config.ws_url,
                        "loaded sync configuration"
                    );
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_WS_URL.into(),
            api_base_url: DEFAULT_API_BASE_URL.into(),
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_MS),
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            frame_capacity: DEFAULT_FRAME_CAPACITY,
            topic_capacity: DEFAULT_TOPIC_CAPACITY,
        }
    }
}

#[derive(Debug, Deserialize)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    ws_url: Option<String>,
    api_base_url: Option<String>,
    heartbeat_ms: Option<u64>,
    reconnect_delay_ms: Option<u64>,
    frame_capacity: Option<usize>,
    topic_capacity: Option<usize>,
}

impl From<RawConfig> for SyncConfig {
    fn from(raw: RawConfig) -> Self {
        let defaults = Self::default();
        Self {
            ws_url: raw.ws_url.unwrap_or(defaults.ws_url),
            api_base_url: raw.api_base_url.unwrap_or(defaults.api_base_url),
            heartbeat_interval: raw
                .heartbeat_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.heartbeat_interval),
            reconnect_delay: raw
                .reconnect_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.reconnect_delay),
            frame_capacity: raw.frame_capacity.unwrap_or(defaults.frame_capacity),
            topic_capacity: raw.topic_capacity.unwrap_or(defaults.topic_capacity),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
