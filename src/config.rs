use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Default backend URL.
/// Override at build time: CLIPDOCK_SERVER_URL=http://host:port cargo build
pub const DEFAULT_SERVER_URL: &str = match option_env!("CLIPDOCK_SERVER_URL") {
    Some(url) => url,
    None => "http://localhost:5000",
};

pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(5000);
pub const DEFAULT_REFETCH_DELAY: Duration = Duration::from_millis(1000);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(10_000);
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_millis(4000);
pub const DEFAULT_PAGE_SIZE: u32 = 100;
/// Upper bound for the keep-alive period.
pub const MAX_PING_INTERVAL: Duration = Duration::from_secs(86_400);

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_url: String,
    /// Explicit bus endpoint; derived from `server_url` when unset.
    pub ws_url: Option<String>,
    pub ping_interval: Duration,
    pub reconnect_delay: Duration,
    pub refetch_delay: Duration,
    pub connect_timeout: Duration,
    pub heartbeat: Duration,
    pub page_size: u32,
    pub log_file: Option<PathBuf>,
    pub export_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            ws_url: None,
            ping_interval: DEFAULT_PING_INTERVAL,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            refetch_delay: DEFAULT_REFETCH_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            heartbeat: DEFAULT_HEARTBEAT,
            page_size: DEFAULT_PAGE_SIZE,
            log_file: None,
            export_dir: PathBuf::from("."),
        }
    }
}

impl Config {
    /// Load `.env` (if any) and read `CLIPDOCK_*` variables on top of the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = non_empty(lookup("CLIPDOCK_SERVER_URL")) {
            config.server_url = url;
        }
        config.ws_url = non_empty(lookup("CLIPDOCK_WS_URL"));

        if let Some(v) = lookup("CLIPDOCK_PING_INTERVAL_SECS") {
            let secs = parse_u64("CLIPDOCK_PING_INTERVAL_SECS", &v)?;
            if secs == 0 || secs > MAX_PING_INTERVAL.as_secs() {
                return Err(ConfigError::Invalid {
                    key: "CLIPDOCK_PING_INTERVAL_SECS",
                    value: v,
                });
            }
            config.ping_interval = Duration::from_secs(secs);
        }
        if let Some(v) = lookup("CLIPDOCK_RECONNECT_DELAY_MS") {
            config.reconnect_delay =
                Duration::from_millis(parse_u64("CLIPDOCK_RECONNECT_DELAY_MS", &v)?);
        }
        if let Some(v) = lookup("CLIPDOCK_REFETCH_DELAY_MS") {
            config.refetch_delay = Duration::from_millis(parse_u64("CLIPDOCK_REFETCH_DELAY_MS", &v)?);
        }
        if let Some(v) = lookup("CLIPDOCK_CONNECT_TIMEOUT_MS") {
            config.connect_timeout =
                Duration::from_millis(parse_u64("CLIPDOCK_CONNECT_TIMEOUT_MS", &v)?);
        }
        if let Some(v) = lookup("CLIPDOCK_HEARTBEAT_MS") {
            config.heartbeat = Duration::from_millis(parse_u64("CLIPDOCK_HEARTBEAT_MS", &v)?);
        }
        if let Some(v) = lookup("CLIPDOCK_PAGE_SIZE") {
            let size = parse_u64("CLIPDOCK_PAGE_SIZE", &v)?;
            config.page_size = u32::try_from(size)
                .ok()
                .filter(|s| *s > 0)
                .ok_or(ConfigError::Invalid {
                    key: "CLIPDOCK_PAGE_SIZE",
                    value: v.clone(),
                })?;
        }

        config.log_file = non_empty(lookup("CLIPDOCK_LOG_FILE")).map(PathBuf::from);
        if let Some(dir) = non_empty(lookup("CLIPDOCK_EXPORT_DIR")) {
            config.export_dir = PathBuf::from(dir);
        }

        Ok(config)
    }

    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = url.into();
        self
    }

    /// Bus endpoint: the explicit override, or the SockJS raw-websocket path under `server_url`.
    pub fn bus_url(&self) -> String {
        if let Some(url) = &self.ws_url {
            return url.clone();
        }
        let ws_base = self
            .server_url
            .trim_end_matches('/')
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);
        format!("{}/ws-clipboard/websocket", ws_base)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_u64(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|_| ConfigError::Invalid {
        key,
        value: value.to_string(),
    })
}
