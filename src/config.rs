//! Monitor configuration
//!
//! Settings are layered: built-in defaults, then an optional JSON file, then
//! `ATTN_*` environment variables, then whatever the caller sets explicitly.

use crate::error::MonitorError;
use crate::reconnect::ReconnectPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Default number of samples kept per subject timeline
pub const DEFAULT_TIMELINE_CAPACITY: usize = 120;

/// Default backend port
pub const DEFAULT_PORT: u16 = 8765;

/// Environment variable overriding the endpoint (`host:port` or `ws://...`)
pub const ENV_ENDPOINT: &str = "ATTN_ENDPOINT";
/// Environment variable overriding the timeline capacity
pub const ENV_TIMELINE_CAPACITY: &str = "ATTN_TIMELINE_CAPACITY";
/// Environment variable enabling alerts (`1`, `true`, `on`)
pub const ENV_ALERTS: &str = "ATTN_ALERTS";

/// Address of the analysis backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint {
    host: String,
    port: u16,
    path: String,
    secure: bool,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            path: String::new(),
            secure: false,
        }
    }

    /// Parse `host:port`, `ws://host:port[/path]` or `wss://host:port[/path]`
    pub fn parse(input: &str) -> Result<Self, MonitorError> {
        let trimmed = input.trim();
        let (secure, rest) = if let Some(rest) = trimmed.strip_prefix("wss://") {
            (true, rest)
        } else if let Some(rest) = trimmed.strip_prefix("ws://") {
            (false, rest)
        } else if trimmed.contains("://") {
            return Err(MonitorError::InvalidEndpoint(format!(
                "unsupported scheme in '{}'",
                trimmed
            )));
        } else {
            (false, trimmed)
        };

        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, ""),
        };

        let (host, port) = authority.rsplit_once(':').ok_or_else(|| {
            MonitorError::InvalidEndpoint(format!("expected host:port, got '{}'", trimmed))
        })?;

        if host.is_empty() {
            return Err(MonitorError::InvalidEndpoint(format!(
                "missing host in '{}'",
                trimmed
            )));
        }

        let port: u16 = port.parse().map_err(|_| {
            MonitorError::InvalidEndpoint(format!("invalid port '{}'", port))
        })?;
        if port == 0 {
            return Err(MonitorError::InvalidEndpoint("port must be non-zero".to_string()));
        }

        Ok(Self {
            host: host.to_string(),
            port,
            path: path.trim_end_matches('/').to_string(),
            secure,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// WebSocket URL used for the handshake
    pub fn url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{}://{}:{}{}", scheme, self.host, self.port, self.path)
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new("127.0.0.1", DEFAULT_PORT)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

impl FromStr for Endpoint {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Endpoint::parse(s)
    }
}

impl TryFrom<String> for Endpoint {
    type Error = MonitorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Endpoint::parse(&value)
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.url()
    }
}

/// Runtime settings for an [`crate::monitor::AttentionMonitor`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Backend address
    pub endpoint: Endpoint,
    /// Maximum samples kept per subject timeline
    pub timeline_capacity: usize,
    /// Whether alerts start enabled
    pub alerts_enabled: bool,
    /// Backoff used by [`crate::reconnect::connect_with_backoff`]
    pub reconnect: ReconnectPolicy,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            timeline_capacity: DEFAULT_TIMELINE_CAPACITY,
            alerts_enabled: false,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl MonitorConfig {
    /// Load configuration from JSON. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, MonitorError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| MonitorError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, MonitorError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Serialize configuration to pretty JSON
    pub fn to_json(&self) -> Result<String, MonitorError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Apply `ATTN_*` overrides from the process environment
    pub fn with_env(self) -> Result<Self, MonitorError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `ATTN_*` overrides from an arbitrary lookup
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, MonitorError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup(ENV_ENDPOINT) {
            self.endpoint = Endpoint::parse(&endpoint)?;
        }

        if let Some(capacity) = lookup(ENV_TIMELINE_CAPACITY) {
            self.timeline_capacity = capacity.trim().parse().map_err(|_| {
                MonitorError::ConfigError(format!(
                    "{} must be a positive integer, got '{}'",
                    ENV_TIMELINE_CAPACITY, capacity
                ))
            })?;
        }

        if let Some(alerts) = lookup(ENV_ALERTS) {
            self.alerts_enabled = parse_flag(&alerts).ok_or_else(|| {
                MonitorError::ConfigError(format!("{} must be a boolean, got '{}'", ENV_ALERTS, alerts))
            })?;
        }

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), MonitorError> {
        if self.timeline_capacity == 0 {
            return Err(MonitorError::ConfigError(
                "timeline_capacity must be at least 1".to_string(),
            ));
        }
        self.reconnect.validate()
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[test]
    fn test_endpoint_parse_host_port() {
        let endpoint = Endpoint::parse("192.168.1.20:8765").unwrap();
        assert_eq!(endpoint.host(), "192.168.1.20");
        assert_eq!(endpoint.port(), 8765);
        assert_eq!(endpoint.url(), "ws://192.168.1.20:8765");
    }

    #[test]
    fn test_endpoint_parse_url_forms() {
        assert_eq!(
            Endpoint::parse("wss://eeg.example.org:443/live/").unwrap().url(),
            "wss://eeg.example.org:443/live"
        );
        assert_eq!(
            Endpoint::parse("ws://[::1]:9000").unwrap().url(),
            "ws://[::1]:9000"
        );
    }

    #[test]
    fn test_endpoint_parse_rejects_bad_input() {
        assert!(Endpoint::parse("localhost").is_err());
        assert!(Endpoint::parse(":8765").is_err());
        assert!(Endpoint::parse("host:0").is_err());
        assert!(Endpoint::parse("host:99999").is_err());
        assert!(Endpoint::parse("http://host:80").is_err());
    }

    #[test]
    fn test_config_from_partial_json() {
        let config = MonitorConfig::from_json(r#"{"endpoint":"10.0.0.5:8765","timeline_capacity":60}"#)
            .unwrap();
        assert_eq!(config.endpoint, Endpoint::new("10.0.0.5", 8765));
        assert_eq!(config.timeline_capacity, 60);
        assert!(!config.alerts_enabled);
    }

    #[test]
    fn test_config_json_round_trip() {
        let config = MonitorConfig {
            alerts_enabled: true,
            ..Default::default()
        };
        let loaded = MonitorConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(MonitorConfig::from_json(r#"{"timeline_capacity":0}"#).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_ENDPOINT, "ws://backend:9001"),
            (ENV_TIMELINE_CAPACITY, "60"),
            (ENV_ALERTS, "on"),
        ]
        .into_iter()
        .collect();

        let config = MonitorConfig::default()
            .with_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.endpoint.url(), "ws://backend:9001");
        assert_eq!(config.timeline_capacity, 60);
        assert!(config.alerts_enabled);
    }

    #[test]
    fn test_env_override_errors() {
        let result = MonitorConfig::default().with_overrides(|key| {
            (key == ENV_ALERTS).then(|| "maybe".to_string())
        });
        assert!(result.is_err());
    }
}
