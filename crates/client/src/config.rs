//! Client configuration.
//!
//! `<data dir>/config.toml`, every key optional. Environment variables
//! override the file and command-line flags override both.

use std::path::Path;
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backoff::ReconnectPolicy;
use crate::error::ConfigError;
use crate::transport::LiveSettings;

pub const SERVER_URL_ENV: &str = "BENCHDASH_SERVER_URL";
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8000";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server_url: String,
    pub request_timeout_ms: u64,
    /// Run detail polling fallback interval.
    pub poll_interval_ms: u64,
    /// Dashboard refetch interval.
    pub list_poll_interval_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub auto_reconnect: bool,
    pub reconnect: ReconnectPolicy,
    /// Open the dashboard live channel in addition to refetching.
    pub dashboard_live: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            request_timeout_ms: 30_000,
            poll_interval_ms: 2_500,
            list_poll_interval_ms: 5_000,
            heartbeat_interval_ms: 25_000,
            auto_reconnect: true,
            reconnect: ReconnectPolicy::default(),
            dashboard_live: true,
        }
    }
}

impl ClientConfig {
    /// Read the config file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(raw) => {
                let config = toml::from_str(&raw)?;
                debug!(
                    component = "config",
                    event = "config.loaded",
                    path = %path.display(),
                    "Config loaded"
                );
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Load from `path`, then apply environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.override_server_url(std::env::var(SERVER_URL_ENV).ok());
        Ok(config)
    }

    /// Replace the server URL when `value` is set and non-empty.
    pub fn override_server_url(&mut self, value: Option<String>) {
        if let Some(url) = value.filter(|v| !v.trim().is_empty()) {
            self.server_url = url.trim().to_string();
        }
    }

    pub fn server_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.server_url)
            .map_err(|e| ConfigError::InvalidUrl(format!("{}: {e}", self.server_url)))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(ConfigError::InvalidUrl(format!(
                "{}: unsupported scheme {other}",
                self.server_url
            ))),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn list_poll_interval(&self) -> Duration {
        Duration::from_millis(self.list_poll_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn live_settings(&self) -> Result<LiveSettings, ConfigError> {
        Ok(LiveSettings {
            base_url: self.server_url()?,
            auto_reconnect: self.auto_reconnect,
            reconnect: self.reconnect,
            heartbeat_interval: self.heartbeat_interval(),
        })
    }
}
