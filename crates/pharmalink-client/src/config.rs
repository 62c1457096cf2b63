//! Client configuration loaded from environment variables.
//!
//! Every setting has a default pointing at the hosted marketplace, so a
//! session can start with nothing but a credential.

use std::time::Duration;

use pharmalink_net::{socket_url_for, ConnectionConfig};
use pharmalink_shared::constants::{
    DEFAULT_HANDSHAKE_TIMEOUT_SECS, DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_SERVICE_HOST,
    NOTIFICATION_DISPLAY_LIMIT, RECONNECT_FLOOR_MS, RECONNECT_MAX_MS, RECONNECT_MIN_MS,
};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the REST API, including the `/api` prefix.
    /// Env: `PHARMALINK_API_URL`
    pub api_base_url: String,

    /// Socket.IO endpoint. Derived from `api_base_url` unless set.
    /// Env: `PHARMALINK_SOCKET_URL`
    pub socket_url: String,

    /// Env: `PHARMALINK_REQUEST_TIMEOUT_SECS`
    /// Default: 15 s
    pub request_timeout: Duration,

    /// Env: `PHARMALINK_HANDSHAKE_TIMEOUT_SECS`
    /// Default: 10 s
    pub handshake_timeout: Duration,

    /// Env: `PHARMALINK_RECONNECT_MIN_MS` / `PHARMALINK_RECONNECT_MAX_MS`
    pub reconnect_min: Duration,
    pub reconnect_max: Duration,

    /// Unread notifications kept for display.
    /// Env: `PHARMALINK_NOTIFICATION_LIMIT`
    pub notification_display_limit: usize,

    /// Request the online set after every (re)connect.
    /// Env: `PHARMALINK_PRESENCE_SNAPSHOT` (true/false)
    pub presence_snapshot: bool,

    /// Show outgoing messages as pending before the server confirms them.
    /// Env: `PHARMALINK_OPTIMISTIC_SEND` (true/false)
    pub optimistic_send: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let api_base_url = format!("https://{DEFAULT_SERVICE_HOST}/api");
        Self {
            socket_url: socket_url_for(&api_base_url),
            api_base_url,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            handshake_timeout: Duration::from_secs(DEFAULT_HANDSHAKE_TIMEOUT_SECS),
            reconnect_min: Duration::from_millis(RECONNECT_MIN_MS),
            reconnect_max: Duration::from_millis(RECONNECT_MAX_MS),
            notification_display_limit: NOTIFICATION_DISPLAY_LIMIT,
            presence_snapshot: true,
            optimistic_send: false,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = get("PHARMALINK_API_URL") {
            config.api_base_url = url.trim_end_matches('/').to_string();
            config.socket_url = socket_url_for(&config.api_base_url);
        }

        if let Some(url) = get("PHARMALINK_SOCKET_URL") {
            config.socket_url = url;
        }

        if let Some(secs) = parse_number(&get, "PHARMALINK_REQUEST_TIMEOUT_SECS") {
            config.request_timeout = Duration::from_secs(secs);
        }

        if let Some(secs) = parse_number(&get, "PHARMALINK_HANDSHAKE_TIMEOUT_SECS") {
            config.handshake_timeout = Duration::from_secs(secs);
        }

        if let Some(ms) = parse_number(&get, "PHARMALINK_RECONNECT_MIN_MS") {
            if ms < RECONNECT_FLOOR_MS {
                tracing::warn!(value = ms, "Reconnect minimum too small, using default");
            } else {
                config.reconnect_min = Duration::from_millis(ms);
            }
        }

        if let Some(ms) = parse_number(&get, "PHARMALINK_RECONNECT_MAX_MS") {
            config.reconnect_max = Duration::from_millis(ms);
        }

        if config.reconnect_max < config.reconnect_min {
            tracing::warn!(
                min_ms = config.reconnect_min.as_millis() as u64,
                max_ms = config.reconnect_max.as_millis() as u64,
                "Reconnect maximum below minimum, using the minimum for both"
            );
            config.reconnect_max = config.reconnect_min;
        }

        if let Some(limit) = parse_number(&get, "PHARMALINK_NOTIFICATION_LIMIT") {
            config.notification_display_limit = limit as usize;
        }

        if let Some(val) = get("PHARMALINK_PRESENCE_SNAPSHOT") {
            config.presence_snapshot = val != "false" && val != "0";
        }

        if let Some(val) = get("PHARMALINK_OPTIMISTIC_SEND") {
            config.optimistic_send = val == "true" || val == "1";
        }

        config
    }

    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            handshake_timeout: self.handshake_timeout,
            reconnect_min: self.reconnect_min,
            reconnect_max: self.reconnect_max,
            presence_snapshot: self.presence_snapshot,
        }
    }
}

fn parse_number(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    let raw = get(key)?;
    match raw.trim().parse::<u64>() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Invalid number, using default");
            None
        }
    }
}
