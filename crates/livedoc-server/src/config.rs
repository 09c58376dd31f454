//! Server configuration.
//!
//! Configuration is layered, later sources winning:
//! - Built-in defaults
//! - TOML configuration file
//! - Environment variables (`LIVEDOC_*`, `__` between nested keys,
//!   e.g. `LIVEDOC_HUB__OUTBOX_CAPACITY=1`)

use anyhow::{Context, Result};
use livedoc_core::HubConfig;
use livedoc_protocol::Encoding;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Locations searched for a config file when none is given.
const CONFIG_PATHS: [&str; 3] = [
    "livedoc.toml",
    "/etc/livedoc/livedoc.toml",
    "~/.config/livedoc/livedoc.toml",
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

    /// Update hub tuning.
    #[serde(default)]
    pub hub: HubSettings,

    /// Content store configuration.
    #[serde(default)]
    pub content: ContentConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for the watch websocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,

    /// Frame encoding pushed to clients.
    #[serde(default)]
    pub encoding: Encoding,

    /// Maximum body size accepted by the publish endpoint.
    #[serde(default = "default_max_publish_size")]
    pub max_publish_size: usize,
}

/// Update hub tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubSettings {
    /// Capacity of the hub's request queues.
    #[serde(default = "default_request_capacity")]
    pub request_capacity: usize,

    /// Undelivered updates a client may lag behind before it is dropped.
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,
}

/// Content store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentConfig {
    /// Directory holding the documents.
    #[serde(default = "default_content_root")]
    pub root: PathBuf,

    /// How often watched documents are checked, in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Documents larger than this are not pushed.
    #[serde(default = "default_max_document_size")]
    pub max_document_size: u64,
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

    /// How often hub statistics are sampled, in milliseconds.
    #[serde(default = "default_sample_interval")]
    pub sample_interval_ms: u64,
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

fn default_max_publish_size() -> usize {
    4 * 1024 * 1024 // 4 MiB
}

fn default_request_capacity() -> usize {
    256
}

fn default_outbox_capacity() -> usize {
    16
}

fn default_content_root() -> PathBuf {
    PathBuf::from("content")
}

fn default_poll_interval() -> u64 {
    500
}

fn default_max_document_size() -> u64 {
    4 * 1024 * 1024 // 4 MiB
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_sample_interval() -> u64 {
    5_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            hub: HubSettings::default(),
            content: ContentConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
            encoding: Encoding::default(),
            max_publish_size: default_max_publish_size(),
        }
    }
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            request_capacity: default_request_capacity(),
            outbox_capacity: default_outbox_capacity(),
        }
    }
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            root: default_content_root(),
            poll_interval_ms: default_poll_interval(),
            max_document_size: default_max_document_size(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
            sample_interval_ms: default_sample_interval(),
        }
    }
}

impl ContentConfig {
    /// Poll interval as a duration.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl MetricsConfig {
    /// Sample interval as a duration.
    #[must_use]
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms.max(1))
    }
}

impl Config {
    /// Load configuration from `path`, or from the first default location
    /// that exists, layered with environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or a
    /// value has the wrong type.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => Some(path.to_path_buf()),
            None => CONFIG_PATHS
                .iter()
                .map(|p| PathBuf::from(shellexpand::tilde(p).as_ref()))
                .find(|p| p.exists()),
        };

        let mut builder = config::Config::builder();
        if let Some(file) = &file {
            tracing::info!("Loading configuration from {}", file.display());
            builder = builder.add_source(config::File::from(file.as_path()));
        }

        builder
            .add_source(
                config::Environment::with_prefix("LIVEDOC")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Load configuration from a specific TOML file, without overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid host:port {}:{}", self.host, self.port))
    }

    /// Hub configuration derived from the `[hub]` section.
    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            request_capacity: self.hub.request_capacity,
            outbox_capacity: self.hub.outbox_capacity,
        }
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
        assert_eq!(config.transport.encoding, Encoding::Json);
        assert_eq!(config.hub.outbox_capacity, 16);
        assert!(config.hub_config().validate().is_ok());
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config::default();
        assert_eq!(config.bind_addr().unwrap().port(), 8080);

        let broken = Config {
            host: "not a host".to_string(),
            ..Config::default()
        };
        assert!(broken.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [transport]
            encoding = "msgpack"

            [hub]
            outbox_capacity = 1

            [content]
            root = "/srv/docs"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.transport.encoding, Encoding::MessagePack);
        assert_eq!(config.hub.outbox_capacity, 1);
        assert_eq!(config.hub.request_capacity, 256);
        assert_eq!(config.content.root, PathBuf::from("/srv/docs"));
        assert_eq!(config.content.poll_interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("livedoc.toml");
        std::fs::write(&path, "port = 7070\n[metrics]\nenabled = false\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.port, 7070);
        assert!(!config.metrics.enabled);

        let direct = Config::from_file(&path).unwrap();
        assert_eq!(direct.port, 7070);
    }

    #[test]
    fn test_load_rejects_bad_types() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("livedoc.toml");
        std::fs::write(&path, "port = \"eighty\"\n").unwrap();

        assert!(Config::load(Some(&path)).is_err());
        assert!(Config::from_file(&path).is_err());
    }
}
