//! Application configuration.

use crate::error::{AppError, AppResult};
use evstream_ws::ConnectionConfig;
use serde::{Deserialize, Serialize};

/// `[websocket]` section. Mirrors [`ConnectionConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsConfig {
    /// Event stream endpoint (`ws://` or `wss://`).
    #[serde(default = "default_url")]
    pub url: String,
    /// Base backoff delay (ms). Default: 1,000.
    #[serde(default = "default_min_reconnect_delay_ms")]
    pub min_reconnect_delay_ms: u64,
    /// Backoff ceiling (ms). Default: 30,000.
    #[serde(default = "default_max_reconnect_delay_ms")]
    pub max_reconnect_delay_ms: u64,
    /// Random jitter added to each delay (ms). Default: 0.
    #[serde(default)]
    pub reconnect_jitter_ms: u64,
    /// Give up after this many consecutive failures. Default: 0 (never).
    #[serde(default)]
    pub max_reconnect_attempts: u32,
    /// Ping interval (ms). Default: 30,000.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Pong deadline (ms). Default: 10,000.
    #[serde(default = "default_pong_timeout_ms")]
    pub pong_timeout_ms: u64,
    /// Handshake deadline (ms). Default: 10,000.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_url() -> String {
    "ws://127.0.0.1:8080/ws".to_string()
}

fn default_min_reconnect_delay_ms() -> u64 {
    1_000
}

fn default_max_reconnect_delay_ms() -> u64 {
    30_000
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_pong_timeout_ms() -> u64 {
    10_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            min_reconnect_delay_ms: default_min_reconnect_delay_ms(),
            max_reconnect_delay_ms: default_max_reconnect_delay_ms(),
            reconnect_jitter_ms: 0,
            max_reconnect_attempts: 0,
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            pong_timeout_ms: default_pong_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl From<&WsConfig> for ConnectionConfig {
    fn from(ws: &WsConfig) -> Self {
        Self {
            url: ws.url.clone(),
            min_reconnect_delay_ms: ws.min_reconnect_delay_ms,
            max_reconnect_delay_ms: ws.max_reconnect_delay_ms,
            reconnect_jitter_ms: ws.reconnect_jitter_ms,
            max_reconnect_attempts: ws.max_reconnect_attempts,
            heartbeat_interval_ms: ws.heartbeat_interval_ms,
            pong_timeout_ms: ws.pong_timeout_ms,
            connect_timeout_ms: ws.connect_timeout_ms,
        }
    }
}

/// `[auth]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Environment variable holding the bearer credential.
    #[serde(default = "default_token_env")]
    pub token_env: String,
}

fn default_token_env() -> String {
    "EVSTREAM_TOKEN".to_string()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_env: default_token_env(),
        }
    }
}

/// `[subscriptions]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionsConfig {
    /// Event types to log. `"*"` subscribes to everything.
    #[serde(default = "default_event_types")]
    pub event_types: Vec<String>,
}

fn default_event_types() -> Vec<String> {
    vec!["*".to_string()]
}

impl Default for SubscriptionsConfig {
    fn default() -> Self {
        Self {
            event_types: default_event_types(),
        }
    }
}

/// `[telemetry]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Default log filter; `RUST_LOG` overrides it.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// How often to log connection and heartbeat status (seconds).
    #[serde(default = "default_status_interval_secs")]
    pub status_interval_secs: u64,
}

fn default_log_level() -> String {
    "info,evstream=debug".to_string()
}

fn default_status_interval_secs() -> u64 {
    60
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            status_interval_secs: default_status_interval_secs(),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub websocket: WsConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub subscriptions: SubscriptionsConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;

        Self::from_toml(&content)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml(content: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply command-line overrides.
    pub fn apply_overrides(&mut self, url: Option<String>, event_types: Vec<String>) {
        if let Some(url) = url {
            self.websocket.url = url;
        }
        if !event_types.is_empty() {
            self.subscriptions.event_types = event_types;
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.websocket.url.trim().is_empty() {
            return Err(AppError::Config("websocket.url is empty".to_string()));
        }
        if self.auth.token_env.trim().is_empty() {
            return Err(AppError::Config("auth.token_env is empty".to_string()));
        }
        if self.subscriptions.event_types.iter().any(|t| t.is_empty()) {
            return Err(AppError::Config(
                "subscriptions.event_types contains an empty type".to_string(),
            ));
        }
        if self.websocket.pong_timeout_ms == 0
            || self.websocket.heartbeat_interval_ms == 0
            || self.websocket.connect_timeout_ms == 0
        {
            return Err(AppError::Config(
                "heartbeat interval, pong timeout and connect timeout must be positive"
                    .to_string(),
            ));
        }
        Ok(())
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig::from(&self.websocket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.auth.token_env, "EVSTREAM_TOKEN");
        assert_eq!(config.subscriptions.event_types, ["*"]);
        assert!(config.validate().is_ok());

        let conn = config.connection_config();
        let defaults = ConnectionConfig::default();
        assert_eq!(conn.min_reconnect_delay_ms, defaults.min_reconnect_delay_ms);
        assert_eq!(conn.max_reconnect_delay_ms, defaults.max_reconnect_delay_ms);
        assert_eq!(conn.heartbeat_interval_ms, defaults.heartbeat_interval_ms);
        assert_eq!(conn.pong_timeout_ms, defaults.pong_timeout_ms);
        assert_eq!(conn.connect_timeout_ms, defaults.connect_timeout_ms);
    }

    #[test]
    fn test_partial_sections_use_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [websocket]
            url = "wss://events.example.com/ws"
            pong_timeout_ms = 5000

            [subscriptions]
            event_types = ["vote.cast", "fault.updated"]
            "#,
        )
        .unwrap();

        assert_eq!(config.websocket.url, "wss://events.example.com/ws");
        assert_eq!(config.websocket.pong_timeout_ms, 5000);
        assert_eq!(config.websocket.heartbeat_interval_ms, 30_000);
        assert_eq!(config.auth.token_env, "EVSTREAM_TOKEN");
        assert_eq!(config.subscriptions.event_types.len(), 2);
    }

    #[test]
    fn test_empty_event_type_rejected() {
        let err = AppConfig::from_toml(
            r#"
            [subscriptions]
            event_types = [""]
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_overrides() {
        let mut config = AppConfig::default();
        config.apply_overrides(None, Vec::new());
        assert_eq!(config.subscriptions.event_types, ["*"]);

        config.apply_overrides(
            Some("wss://other.example.com/ws".to_string()),
            vec!["x".to_string()],
        );
        assert_eq!(config.websocket.url, "wss://other.example.com/ws");
        assert_eq!(config.subscriptions.event_types, ["x"]);
    }

    #[test]
    fn test_config_serialization() {
        let config = AppConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        assert!(toml_str.contains("token_env"));
        assert!(toml_str.contains("pong_timeout_ms"));
    }

    #[test]
    fn test_bundled_default_config_parses() {
        let content = include_str!("../../../config/default.toml");
        assert!(AppConfig::from_toml(content).is_ok());
    }
}
