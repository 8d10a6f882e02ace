//! Connector options.
//!
//! Options can be built in code, deserialized from any serde format (the
//! binary reads TOML), or converted from a loose JSON mapping. Known keys
//! fall back to their defaults when absent; unknown keys are kept in
//! [`Options::extra`] untouched.

use beacon_transport::TransportConfig;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::BeaconError;
use crate::formatter::EventFormatter;

/// Connector options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Options {
    /// Server address. Required to connect.
    #[serde(default)]
    pub host: Option<String>,

    /// Namespace prepended to event names.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Path or URL of the channel authorization endpoint.
    #[serde(default = "default_auth_endpoint", alias = "authEndpoint")]
    pub auth_endpoint: String,

    /// Base URL a relative `auth_endpoint` is resolved against.
    /// Defaults to the host with `ws` mapped to `http`.
    #[serde(default, alias = "authHost")]
    pub auth_host: Option<String>,

    /// Authorization request settings.
    #[serde(default)]
    pub auth: AuthOptions,

    /// Broadcaster identifier. Informational only.
    #[serde(default = "default_broadcaster")]
    pub broadcaster: String,

    /// Application key sent in the handshake. Empty means none.
    #[serde(default)]
    pub key: String,

    /// Transport tuning.
    #[serde(default)]
    pub transport: TransportOptions,

    /// Unrecognized keys, passed through untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Authorization request settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthOptions {
    /// Headers sent with every authorization request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// Transport tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportOptions {
    /// Log every frame at debug level.
    #[serde(default)]
    pub log: bool,

    /// Use compact binary frames.
    #[serde(default)]
    pub compress: bool,

    /// Connect timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Largest inbound message accepted, in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

// Default value functions
fn default_namespace() -> String {
    "App.Events".to_string()
}

fn default_auth_endpoint() -> String {
    "/broadcasting/auth".to_string()
}

fn default_broadcaster() -> String {
    "socket.io".to_string()
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

impl Default for Options {
    fn default() -> Self {
        Self {
            host: None,
            namespace: default_namespace(),
            auth_endpoint: default_auth_endpoint(),
            auth_host: None,
            auth: AuthOptions::default(),
            broadcaster: default_broadcaster(),
            key: String::new(),
            transport: TransportOptions::default(),
            extra: serde_json::Map::new(),
        }
    }
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            log: false,
            compress: false,
            connect_timeout_secs: default_connect_timeout(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Options {
    /// Default options pointing at `host`.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            ..Self::default()
        }
    }

    /// Build options from a loose mapping such as `{"host": "...", "authEndpoint": "..."}`.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::Config`] if a known key has the wrong type.
    pub fn from_value(value: serde_json::Value) -> Result<Self, BeaconError> {
        serde_json::from_value(value).map_err(|e| BeaconError::Config(e.to_string()))
    }

    /// Add an authorization header.
    #[must_use]
    pub fn with_auth_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.auth.headers.insert(name.into(), value.into());
        self
    }

    /// The WebSocket URL to connect to.
    ///
    /// `http` and `https` hosts are mapped to `ws` and `wss`.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::Config`] if the host is missing, unparsable,
    /// or uses another scheme.
    pub fn endpoint(&self) -> Result<Url, BeaconError> {
        let host = self
            .host
            .as_deref()
            .filter(|h| !h.trim().is_empty())
            .ok_or_else(|| BeaconError::Config("host is missing".into()))?;

        let mut url = Url::parse(host)
            .map_err(|e| BeaconError::Config(format!("invalid host {host:?}: {e}")))?;
        if url.host_str().is_none() {
            return Err(BeaconError::Config(format!("host {host:?} has no hostname")));
        }

        let scheme = match url.scheme() {
            "ws" | "http" => "ws",
            "wss" | "https" => "wss",
            other => {
                return Err(BeaconError::Config(format!(
                    "unsupported scheme {other:?} in host {host:?}"
                )))
            }
        };
        if url.scheme() != scheme && url.set_scheme(scheme).is_err() {
            return Err(BeaconError::Config(format!("cannot use {host:?} as {scheme}")));
        }
        Ok(url)
    }

    /// The absolute URL of the authorization endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::Config`] if no usable base URL can be derived.
    pub fn auth_url(&self) -> Result<Url, BeaconError> {
        if let Ok(absolute) = Url::parse(&self.auth_endpoint) {
            return Ok(absolute);
        }

        let base = match &self.auth_host {
            Some(auth_host) => Url::parse(auth_host)
                .map_err(|e| BeaconError::Config(format!("invalid auth_host {auth_host:?}: {e}")))?,
            None => {
                let mut base = self.endpoint()?;
                let scheme = if base.scheme() == "wss" { "https" } else { "http" };
                if base.set_scheme(scheme).is_err() {
                    return Err(BeaconError::Config(format!(
                        "cannot derive auth URL from {base}"
                    )));
                }
                base
            }
        };

        base.join(&self.auth_endpoint).map_err(|e| {
            BeaconError::Config(format!(
                "invalid auth_endpoint {:?}: {e}",
                self.auth_endpoint
            ))
        })
    }

    /// Transport settings for a connection to `url`.
    #[must_use]
    pub fn transport_config(&self, url: &Url) -> TransportConfig {
        TransportConfig {
            url: url.to_string(),
            key: (!self.key.is_empty()).then(|| self.key.clone()),
            log: self.transport.log,
            compress: self.transport.compress,
            max_message_size: self.transport.max_message_size,
        }
    }

    /// Bound on a single connect attempt.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.transport.connect_timeout_secs)
    }

    /// Event name formatter for the configured namespace.
    #[must_use]
    pub fn formatter(&self) -> EventFormatter {
        EventFormatter::new(self.namespace.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let options = Options::default();
        assert_eq!(options.host, None);
        assert_eq!(options.namespace, "App.Events");
        assert_eq!(options.auth_endpoint, "/broadcasting/auth");
        assert_eq!(options.broadcaster, "socket.io");
        assert!(options.key.is_empty());
        assert!(options.auth.headers.is_empty());
        assert_eq!(options.connect_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_from_value_explicit_beats_default_and_keeps_extra() {
        let options = Options::from_value(json!({
            "host": "http://localhost:6001",
            "authEndpoint": "/api/broadcasting/auth",
            "auth": { "headers": { "Authorization": "Bearer t" } },
            "namespace": "Domain.Events",
            "csrfToken": "abc"
        }))
        .unwrap();

        assert_eq!(options.auth_endpoint, "/api/broadcasting/auth");
        assert_eq!(options.namespace, "Domain.Events");
        assert_eq!(options.broadcaster, "socket.io");
        assert_eq!(options.auth.headers["Authorization"], "Bearer t");
        assert_eq!(options.extra["csrfToken"], "abc");
    }

    #[test]
    fn test_from_value_wrong_type() {
        assert!(matches!(
            Options::from_value(json!({ "host": 42 })),
            Err(BeaconError::Config(_))
        ));
    }

    #[test]
    fn test_endpoint_validation() {
        assert!(matches!(
            Options::default().endpoint(),
            Err(BeaconError::Config(_))
        ));
        assert!(matches!(
            Options::new("   ").endpoint(),
            Err(BeaconError::Config(_))
        ));
        assert!(matches!(
            Options::new("not a url").endpoint(),
            Err(BeaconError::Config(_))
        ));
        assert!(matches!(
            Options::new("ftp://example.com").endpoint(),
            Err(BeaconError::Config(_))
        ));

        let url = Options::new("https://echo.example.com:6001/socket").endpoint().unwrap();
        assert_eq!(url.as_str(), "wss://echo.example.com:6001/socket");

        let url = Options::new("ws://127.0.0.1:6001").endpoint().unwrap();
        assert_eq!(url.scheme(), "ws");
    }

    #[test]
    fn test_auth_url_resolution() {
        let options = Options::new("wss://echo.example.com:6001");
        assert_eq!(
            options.auth_url().unwrap().as_str(),
            "https://echo.example.com:6001/broadcasting/auth"
        );

        let mut options = Options::new("ws://127.0.0.1:6001");
        options.auth_host = Some("http://app.test".into());
        assert_eq!(
            options.auth_url().unwrap().as_str(),
            "http://app.test/broadcasting/auth"
        );

        options.auth_endpoint = "https://auth.example.com/authorize".into();
        assert_eq!(
            options.auth_url().unwrap().as_str(),
            "https://auth.example.com/authorize"
        );
    }

    #[test]
    fn test_transport_config() {
        let mut options = Options::new("ws://127.0.0.1:6001");
        options.key = "app-key".into();
        options.transport.compress = true;

        let url = options.endpoint().unwrap();
        let config = options.transport_config(&url);
        assert_eq!(config.url, "ws://127.0.0.1:6001/");
        assert_eq!(config.key.as_deref(), Some("app-key"));
        assert!(config.compress);
        assert!(!config.log);
    }

    #[test]
    fn test_from_toml() {
        let toml_str = r#"
            host = "ws://localhost:6001"
            auth_endpoint = "/auth"

            [auth.headers]
            Authorization = "Bearer abc"

            [transport]
            connect_timeout_secs = 2
        "#;

        let options: Options = toml::from_str(toml_str).unwrap();
        assert_eq!(options.auth_endpoint, "/auth");
        assert_eq!(options.auth.headers["Authorization"], "Bearer abc");
        assert_eq!(options.connect_timeout(), Duration::from_secs(2));
        assert_eq!(options.transport.max_message_size, 64 * 1024);
    }
}
