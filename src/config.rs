//! Channel configuration.
//!
//! The endpoint is a single fixed path resolved against a base URL once, at
//! startup. Both timer periods default to one second.

use std::time::Duration;

/// Base URL used when none is configured.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080";

/// Path of the completions socket on the server.
pub const COMPLETIONS_PATH: &str = "/ws/completions";

/// Delay between reconnect attempts while no socket is open.
pub const DEFAULT_RECONNECT_MS: u64 = 1_000;

/// Delay between a pong and the next ping.
pub const DEFAULT_PING_MS: u64 = 1_000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
}

/// Everything the hub needs to open and maintain the channel.
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    /// Fully resolved `ws://` or `wss://` URL.
    pub endpoint: String,
    pub reconnect_interval: Duration,
    pub ping_interval: Duration,
}

impl ChannelConfig {
    /// Config for `endpoint` with default timer periods.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            reconnect_interval: Duration::from_millis(DEFAULT_RECONNECT_MS),
            ping_interval: Duration::from_millis(DEFAULT_PING_MS),
        }
    }

    /// Resolve `path` against `base_url` and build a config with default timers.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBaseUrl`] if the scheme is not http(s) or ws(s).
    pub fn resolve(base_url: &str, path: &str) -> Result<Self, ConfigError> {
        Ok(Self::new(ws_endpoint(base_url, path)?))
    }

    #[must_use]
    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    #[must_use]
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }
}

/// Turn an http(s) base URL plus a path into the websocket URL.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidBaseUrl`] for any other scheme.
pub fn ws_endpoint(base_url: &str, path: &str) -> Result<String, ConfigError> {
    let trimmed = base_url.trim_end_matches('/');
    let path = path.trim_start_matches('/');

    for (from, to) in [("http://", "ws://"), ("https://", "wss://"), ("ws://", "ws://"), ("wss://", "wss://")] {
        if let Some(rest) = trimmed.strip_prefix(from) {
            if rest.is_empty() {
                break;
            }
            return Ok(format!("{to}{rest}/{path}"));
        }
    }

    Err(ConfigError::InvalidBaseUrl(base_url.to_owned()))
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
