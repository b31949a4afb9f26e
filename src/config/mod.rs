//! Hub client configuration loaded from environment.

use std::time::Duration;

use validator::{Validate, ValidationError};

use crate::models::chat::ChatId;
use crate::services::reconnect::ReconnectPolicy;

/// Hub client configuration loaded from `.env` and environment variables.
#[derive(Debug, Clone, Validate)]
#[validate(schema(function = "validate_settings"))]
pub struct HubConfig {
    /// Hub endpoint (e.g. `https://chat.example.com/chatHub`). `http(s)` is mapped to `ws(s)`.
    #[validate(url)]
    pub hub_url: String,
    /// Delay before the first retry after a failure, and the floor for every retry.
    #[validate(range(min = 1))]
    pub reconnect_delay_ms: u64,
    /// Backoff cap. Equal to `reconnect_delay_ms` means a fixed delay.
    #[validate(range(min = 1))]
    pub max_reconnect_delay_ms: u64,
    /// Bound on the WebSocket upgrade plus hub handshake.
    #[validate(range(min = 1))]
    pub handshake_timeout_ms: u64,
    /// Interval between client pings.
    #[validate(range(min = 1))]
    pub keep_alive_ms: u64,
    /// Silence after which the link is treated as dropped.
    #[validate(range(min = 1))]
    pub server_timeout_ms: u64,
    /// Chat to open once the binary starts, if any.
    pub open_chat: Option<ChatId>,
    /// Log level: `error`, `warn`, `info`, `debug`, `trace`.
    pub log_level: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            hub_url: "http://localhost:5000/chatHub".to_string(),
            reconnect_delay_ms: 5_000,
            max_reconnect_delay_ms: 5_000,
            handshake_timeout_ms: 15_000,
            keep_alive_ms: 15_000,
            server_timeout_ms: 30_000,
            open_chat: None,
            log_level: "info".to_string(),
        }
    }
}

impl HubConfig {
    /// Load configuration from environment. Call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        let defaults = Self::default();

        let hub_url = std::env::var("HUB_URL").unwrap_or(defaults.hub_url);
        let reconnect_delay_ms = env_millis("HUB_RECONNECT_DELAY_MS", defaults.reconnect_delay_ms)?;
        // An unset cap keeps the delay fixed.
        let max_reconnect_delay_ms = env_millis("HUB_MAX_RECONNECT_DELAY_MS", reconnect_delay_ms)?;
        let handshake_timeout_ms =
            env_millis("HUB_HANDSHAKE_TIMEOUT_MS", defaults.handshake_timeout_ms)?;
        let keep_alive_ms = env_millis("HUB_KEEP_ALIVE_MS", defaults.keep_alive_ms)?;
        let server_timeout_ms = env_millis("HUB_SERVER_TIMEOUT_MS", defaults.server_timeout_ms)?;
        let open_chat = match std::env::var("HUB_CHAT_ID") {
            Ok(raw) => Some(
                raw.parse::<ChatId>()
                    .map_err(|_| ConfigLoadError::InvalidNumber("HUB_CHAT_ID"))?,
            ),
            Err(_) => None,
        };
        let log_level = std::env::var("LOG_LEVEL").unwrap_or(defaults.log_level);

        let config = Self {
            hub_url,
            reconnect_delay_ms,
            max_reconnect_delay_ms,
            handshake_timeout_ms,
            keep_alive_ms,
            server_timeout_ms,
            open_chat,
            log_level,
        };
        config
            .validate()
            .map_err(|e| ConfigLoadError::Invalid(e.to_string()))?;
        Ok(config)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::exponential(
            Duration::from_millis(self.reconnect_delay_ms),
            Duration::from_millis(self.max_reconnect_delay_ms),
        )
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }

    pub fn server_timeout(&self) -> Duration {
        Duration::from_millis(self.server_timeout_ms)
    }
}

fn env_millis(var: &'static str, default: u64) -> Result<u64, ConfigLoadError> {
    match std::env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigLoadError::InvalidNumber(var)),
        Err(_) => Ok(default),
    }
}

/// Schemes the connector can dial. Anything else would fail on every retry.
const HUB_SCHEMES: [&str; 4] = ["http://", "https://", "ws://", "wss://"];

fn validate_settings(config: &HubConfig) -> Result<(), ValidationError> {
    let hub_url = config.hub_url.trim();
    if !HUB_SCHEMES.iter().any(|scheme| hub_url.starts_with(scheme)) {
        return Err(ValidationError::new("unsupported_hub_url_scheme"));
    }
    if config.server_timeout_ms <= config.keep_alive_ms {
        return Err(ValidationError::new("server_timeout_not_above_keep_alive"));
    }
    if config.max_reconnect_delay_ms < config.reconnect_delay_ms {
        return Err(ValidationError::new("max_reconnect_delay_below_reconnect_delay"));
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("Invalid number in {0}")]
    InvalidNumber(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid_and_fixed_delay() {
        let config = HubConfig::default();
        assert!(config.validate().is_ok());
        let policy = config.reconnect_policy();
        assert_eq!(policy.delay_for(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for(10), Duration::from_secs(5));
    }

    #[test]
    fn rejects_server_timeout_not_above_keep_alive() {
        let config = HubConfig {
            keep_alive_ms: 30_000,
            server_timeout_ms: 30_000,
            ..HubConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_cap_below_floor() {
        let config = HubConfig {
            reconnect_delay_ms: 5_000,
            max_reconnect_delay_ms: 1_000,
            ..HubConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_scheme_the_connector_cannot_dial() {
        let config = HubConfig {
            hub_url: "ftp://chat.example.com/chatHub".to_string(),
            ..HubConfig::default()
        };
        assert!(config.validate().is_err());

        let config = HubConfig {
            hub_url: "wss://chat.example.com/chatHub".to_string(),
            ..HubConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_non_url_hub() {
        let config = HubConfig {
            hub_url: "not a url".to_string(),
            ..HubConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
