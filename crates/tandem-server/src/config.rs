//! Server configuration.
//!
//! Configuration can be loaded from:
//! - TOML configuration file
//! - Environment variables (`TANDEM__*`, nested keys separated by `__`)

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Config files probed by [`Config::load`], first match wins.
const CONFIG_PATHS: [&str; 3] = [
    "tandem.toml",
    "/etc/tandem/tandem.toml",
    "~/.config/tandem/tandem.toml",
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

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Matchmaking configuration.
    #[serde(default)]
    pub matchmaking: MatchmakingConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,

    /// Origins allowed to open a WebSocket. Empty admits any origin.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Ping interval in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,

    /// How long to wait for a pong before dropping the connection, in milliseconds.
    #[serde(default = "default_heartbeat_timeout")]
    pub timeout_ms: u64,
}

/// Matchmaking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchmakingConfig {
    /// Maximum number of groups.
    #[serde(default = "default_max_groups")]
    pub max_groups: usize,
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

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_allowed_origins() -> Vec<String> {
    vec!["http://localhost:8080".to_string()]
}

fn default_max_message_size() -> usize {
    512
}

fn default_heartbeat_timeout() -> u64 {
    10_000 // 10 seconds
}

fn default_heartbeat_interval() -> u64 {
    default_heartbeat_timeout() * 9 / 10
}

fn default_max_groups() -> usize {
    10_000
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
            limits: LimitsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            matchmaking: MatchmakingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
            allowed_origins: default_allowed_origins(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
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

impl Default for MatchmakingConfig {
    fn default() -> Self {
        Self {
            max_groups: default_max_groups(),
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

impl TransportConfig {
    /// Check an `Origin` header against the allow-list.
    #[must_use]
    pub fn origin_allowed(&self, origin: Option<&str>) -> bool {
        if self.allowed_origins.is_empty() {
            return true;
        }
        origin.is_some_and(|o| self.allowed_origins.iter().any(|allowed| allowed == o))
    }
}

impl HeartbeatConfig {
    /// Ping interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Pong wait window.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Config {
    /// Load configuration from the first config file found (or defaults),
    /// overlaid with `TANDEM__*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, an
    /// environment override has the wrong type, or the result is invalid.
    pub fn load() -> Result<Self> {
        let base = CONFIG_PATHS
            .iter()
            .map(|path| shellexpand::tilde(*path))
            .find(|path| Path::new(path.as_ref()).exists());

        let base = match base {
            Some(path) => Self::from_file(path.as_ref())?,
            None => Self::default(),
        };

        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&base).context("Failed to load configuration")?)
            .add_source(
                config::Environment::with_prefix("TANDEM")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("transport.allowed_origins"),
            )
            .build()
            .context("Failed to load configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Invalid configuration")?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        Ok(config)
    }

    /// Check values that would break connections at runtime.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        let heartbeat = &self.heartbeat;
        ensure!(heartbeat.interval_ms > 0, "heartbeat.interval_ms must be greater than 0");
        ensure!(heartbeat.timeout_ms > 0, "heartbeat.timeout_ms must be greater than 0");
        ensure!(
            heartbeat.interval_ms < heartbeat.timeout_ms,
            "heartbeat.interval_ms ({}) must be below heartbeat.timeout_ms ({})",
            heartbeat.interval_ms,
            heartbeat.timeout_ms
        );
        ensure!(self.limits.max_message_size > 0, "limits.max_message_size must be greater than 0");
        ensure!(self.matchmaking.max_groups > 0, "matchmaking.max_groups must be greater than 0");
        Ok(())
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a valid socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.transport.websocket_path, "/ws");
        assert_eq!(config.limits.max_message_size, 512);
        assert_eq!(config.heartbeat.timeout(), Duration::from_secs(10));
        assert_eq!(config.heartbeat.interval(), Duration::from_secs(9));
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config::default();
        let addr = config.bind_addr().unwrap();
        assert_eq!(addr.port(), 8080);

        let bad = Config {
            host: "not a host".to_string(),
            ..Config::default()
        };
        assert!(bad.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [transport]
            allowed_origins = []

            [heartbeat]
            timeout_ms = 2000
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert!(config.transport.allowed_origins.is_empty());
        assert_eq!(config.heartbeat.timeout_ms, 2000);
        assert_eq!(config.matchmaking.max_groups, 10_000);
    }

    #[test]
    fn test_config_from_file() {
        let path = std::env::temp_dir().join(format!("tandem-test-{}.toml", std::process::id()));
        std::fs::write(&path, "port = 7000\n[limits]\nmax_message_size = 1024\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.port, 7000);
        assert_eq!(config.limits.max_message_size, 1024);
        assert!(Config::from_file(&path).is_err());
    }

    #[test]
    fn test_config_validation() {
        assert!(Config::default().validate().is_ok());

        let mut config = Config::default();
        config.heartbeat.interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.heartbeat.interval_ms = 10_000;
        config.heartbeat.timeout_ms = 10_000;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("heartbeat.interval_ms"));

        let mut config = Config::default();
        config.heartbeat.timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.matchmaking.max_groups = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_heartbeat_file_is_rejected() {
        let path = std::env::temp_dir().join(format!(
            "tandem-test-heartbeat-{}.toml",
            std::process::id()
        ));
        std::fs::write(&path, "[heartbeat]\ninterval_ms = 0\n").unwrap();

        let result = Config::from_file(&path);
        std::fs::remove_file(&path).unwrap();

        assert!(result.is_err());
    }

    #[test]
    fn test_origin_policy() {
        let transport = TransportConfig::default();
        assert!(transport.origin_allowed(Some("http://localhost:8080")));
        assert!(!transport.origin_allowed(Some("http://evil.example")));
        assert!(!transport.origin_allowed(None));

        let open = TransportConfig {
            allowed_origins: Vec::new(),
            ..TransportConfig::default()
        };
        assert!(open.origin_allowed(None));
        assert!(open.origin_allowed(Some("http://anywhere.example")));
    }
}
