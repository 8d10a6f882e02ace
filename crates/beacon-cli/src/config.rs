//! Listener configuration.
//!
//! Configuration is layered:
//! - TOML file (`beacon.toml`), from the command line or a default path
//! - Environment variables (`BEACON_CONNECTION__HOST=wss://...`)

use ::config::{Environment, File, FileFormat};
use anyhow::{Context, Result};
use beacon_core::{ChannelKind, Options};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default config file locations, in search order.
const CONFIG_PATHS: [&str; 3] = [
    "beacon.toml",
    "/etc/beacon/beacon.toml",
    "~/.config/beacon/beacon.toml",
];

/// Listener configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connector options.
    #[serde(default)]
    pub connection: Options,

    /// Channels to join at startup.
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// A channel to join and the events to print from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Logical channel name, without a kind prefix.
    pub channel: String,

    #[serde(default)]
    pub kind: SubscriptionKind,

    /// Events to listen for, formatted with the connection namespace.
    #[serde(default)]
    pub events: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionKind {
    #[default]
    Public,
    Private,
    Presence,
}

impl From<SubscriptionKind> for ChannelKind {
    fn from(kind: SubscriptionKind) -> Self {
        match kind {
            SubscriptionKind::Public => ChannelKind::Public,
            SubscriptionKind::Private => ChannelKind::Private,
            SubscriptionKind::Presence => ChannelKind::Presence,
        }
    }
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default)]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, or the first default path that
    /// exists, with environment overrides applied on top.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicit path does not exist, or if the file
    /// or environment cannot be parsed.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let file = match path {
            Some(path) => {
                let expanded = PathBuf::from(shellexpand::tilde(path).as_ref());
                if !expanded.exists() {
                    anyhow::bail!("Config file not found: {}", expanded.display());
                }
                Some(expanded)
            }
            None => Self::find(),
        };
        Self::layered(file.as_deref())
    }

    fn find() -> Option<PathBuf> {
        CONFIG_PATHS
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
            .find(|path| path.exists())
    }

    fn layered(file: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(file) = file {
            builder = builder.add_source(File::from(file).format(FileFormat::Toml));
        }
        builder = builder.add_source(
            Environment::with_prefix("BEACON")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let source = match file {
            Some(file) => file.display().to_string(),
            None => "environment".to_string(),
        };
        builder
            .build()
            .and_then(|layers| layers.try_deserialize())
            .with_context(|| format!("Failed to load config from {source}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(!config.metrics.enabled);
        assert_eq!(config.metrics.port, 9090);
        assert!(config.subscriptions.is_empty());
        assert_eq!(config.connection.namespace, "App.Events");
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            [connection]
            host = "wss://ws.example.com"
            namespace = "Shop.Events"

            [connection.auth.headers]
            Authorization = "Bearer abc"

            [[subscriptions]]
            channel = "orders.1"
            kind = "private"
            events = ["OrderShipped", ".client-typing"]

            [[subscriptions]]
            channel = "lobby"

            [metrics]
            enabled = true
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.connection.host.as_deref(), Some("wss://ws.example.com"));
        assert_eq!(config.connection.auth.headers["Authorization"], "Bearer abc");
        assert_eq!(config.subscriptions.len(), 2);
        assert_eq!(config.subscriptions[0].kind, SubscriptionKind::Private);
        assert_eq!(config.subscriptions[1].kind, SubscriptionKind::Public);
        assert!(config.subscriptions[1].events.is_empty());
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.port, 9090);
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("beacon-test-{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[connection]\nhost = \"ws://127.0.0.1:6001\"\n\n[[subscriptions]]\nchannel = \"room\"\nkind = \"presence\""
        )
        .unwrap();

        let config = Config::load(path.to_str()).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.connection.host.as_deref(), Some("ws://127.0.0.1:6001"));
        assert_eq!(config.subscriptions[0].kind, SubscriptionKind::Presence);
        assert_eq!(
            ChannelKind::from(config.subscriptions[0].kind),
            ChannelKind::Presence
        );
    }

    #[test]
    fn test_missing_explicit_path() {
        assert!(Config::load(Some("/nonexistent/beacon.toml")).is_err());
    }
}
