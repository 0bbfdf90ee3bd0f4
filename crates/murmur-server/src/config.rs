//! Server configuration.
//!
//! Configuration can be loaded from:
//! - TOML configuration file (`murmur.toml`, `/etc/murmur/murmur.toml`,
//!   `~/.config/murmur/murmur.toml`)
//! - Environment variables (`MURMUR__PORT`, `MURMUR__HEARTBEAT__TIMEOUT_MS`, ...)

use anyhow::{Context, Result};
use murmur_core::HubConfig;
use murmur_protocol::Identity;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_PATHS: [&str; 3] = [
    "murmur.toml",
    "/etc/murmur/murmur.toml",
    "~/.config/murmur/murmur.toml",
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    #[serde(default)]
    pub chat: ChatConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Users whose display names are written to the store at startup.
    #[serde(default)]
    pub users: Vec<UserSeed>,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// WebSocket endpoint prefix; the user id is the segment after it.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,

    /// Longest a single push or close may take before the peer is dropped,
    /// in milliseconds.
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Pause before each ping, in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,

    /// Wait for the pong, in milliseconds.
    #[serde(default = "default_heartbeat_timeout")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// How long after sending a message may still be edited.
    #[serde(default = "default_max_edit_window")]
    pub max_edit_window_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file.
    #[serde(default = "default_store_path")]
    pub path: String,
}

/// Bearer tokens accepted on the WebSocket endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub tokens: Vec<TokenGrant>,
}

/// One token and the identity it authenticates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenGrant {
    pub token: String,
    pub identity: Identity,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// A user row to upsert at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSeed {
    pub id: Identity,
    pub username: String,
    #[serde(default)]
    pub nickname: Option<String>,
}

fn default_host() -> String {
    std::env::var("MURMUR_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("MURMUR_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/chat/ws".to_string()
}

fn default_write_timeout() -> u64 {
    10_000
}

fn default_heartbeat_interval() -> u64 {
    20_000
}

fn default_heartbeat_timeout() -> u64 {
    20_000
}

fn default_max_edit_window() -> u64 {
    15 * 60
}

fn default_store_path() -> String {
    "murmur.db".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            chat: ChatConfig::default(),
            store: StoreConfig::default(),
            auth: AuthConfig::default(),
            metrics: MetricsConfig::default(),
            users: Vec::new(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
            write_timeout_ms: default_write_timeout(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
            timeout_ms: default_heartbeat_timeout(),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_edit_window_secs: default_max_edit_window(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load the first config file found, layered with `MURMUR__*`
    /// environment variables. Defaults fill whatever neither sets.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = Self::find_file() {
            builder = builder.add_source(
                ::config::File::from(path).format(::config::FileFormat::Toml),
            );
        }

        builder
            .add_source(
                ::config::Environment::with_prefix("MURMUR")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to assemble configuration")?
            .try_deserialize()
            .context("Invalid configuration")
    }

    fn find_file() -> Option<PathBuf> {
        CONFIG_PATHS
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
            .find(|path| path.exists())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// Route of the WebSocket endpoint, with the user id as a path parameter.
    #[must_use]
    pub fn websocket_route(&self) -> String {
        format!("{}/:user_id", self.transport.websocket_path.trim_end_matches('/'))
    }

    /// Settings handed to the hub.
    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            heartbeat_interval: Duration::from_millis(self.heartbeat.interval_ms),
            pong_timeout: Duration::from_millis(self.heartbeat.timeout_ms),
            max_edit_window: Duration::from_secs(self.chat.max_edit_window_secs),
            write_timeout: Duration::from_millis(self.transport.write_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.transport.websocket_path, "/chat/ws");
        assert_eq!(config.heartbeat.timeout_ms, 20_000);
        assert_eq!(config.store.path, "murmur.db");
        assert!(config.auth.tokens.is_empty());
        assert_eq!(config.hub_config(), HubConfig::default());
    }

    #[test]
    fn test_config_bind_addr() {
        let mut config = Config::default();
        config.host = "127.0.0.1".into();
        config.port = 8080;
        assert_eq!(config.bind_addr().unwrap().port(), 8080);

        config.host = "not a host".into();
        assert!(config.bind_addr().is_err());
    }

    #[test]
    fn test_websocket_route() {
        let mut config = Config::default();
        assert_eq!(config.websocket_route(), "/chat/ws/:user_id");
        config.transport.websocket_path = "/ws/".into();
        assert_eq!(config.websocket_route(), "/ws/:user_id");
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [heartbeat]
            interval_ms = 5000
            timeout_ms = 300000

            [transport]
            write_timeout_ms = 2500

            [chat]
            max_edit_window_secs = 60

            [[auth.tokens]]
            token = "s3cret"
            identity = 7

            [[users]]
            id = 7
            username = "ada"
            nickname = "Ada"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(
            config.auth.tokens,
            vec![TokenGrant {
                token: "s3cret".into(),
                identity: 7
            }]
        );
        assert_eq!(config.users[0].nickname.as_deref(), Some("Ada"));

        let hub = config.hub_config();
        assert_eq!(hub.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(hub.pong_timeout, Duration::from_secs(300));
        assert_eq!(hub.max_edit_window, Duration::from_secs(60));
        assert_eq!(hub.write_timeout, Duration::from_millis(2500));
        assert_eq!(config.transport.websocket_path, "/chat/ws");
    }
}
