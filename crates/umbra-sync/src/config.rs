//! # Shadow Client Configuration
//!
//! TOML-backed configuration with environment overrides.
//!
//! ## Config File Location
//! - Linux: `~/.config/umbra/config.toml`
//! - macOS: `~/Library/Application Support/umbra/config.toml`
//! - Windows: `%APPDATA%\umbra\config.toml`
//!
//! ## Example
//! ```toml
//! [client]
//! id = "c2a9e7ac-5b8f-4d2e-9c1a-7f3b8e6d4a21"
//! name = "lobby-thermostat"
//!
//! [endpoint]
//! url = "wss://shadows.example.com/things"
//! connect_timeout_secs = 10
//!
//! [shadow]
//! operation_timeout_ms = 10000
//! fetch_on_connect = true
//! fetch_delay_ms = 2500
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

use crate::error::{ShadowError, ShadowResult};
use crate::transport::TransportConfig;

// =============================================================================
// Configuration Types
// =============================================================================

/// Top-level configuration for the shadow client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShadowConfig {
    /// Client identity.
    #[serde(default)]
    pub client: ClientConfig,

    /// Shadow endpoint connection settings.
    #[serde(default)]
    pub endpoint: EndpointConfig,

    /// Shadow operation settings.
    #[serde(default)]
    pub shadow: ShadowSettings,
}

/// Client identity settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Unique client ID; prefixes every correlation token. Generated on
    /// first save when absent.
    #[serde(default = "generate_client_id")]
    pub id: String,

    /// Human-readable client name.
    #[serde(default = "default_client_name")]
    pub name: String,
}

/// Shadow endpoint connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// WebSocket URL of the shadow endpoint.
    #[serde(default)]
    pub url: String,

    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Initial reconnect backoff in milliseconds.
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Maximum reconnect backoff in seconds.
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// Maximum reconnection attempts (0 = infinite).
    #[serde(default)]
    pub max_retries: u32,

    /// Keepalive ping interval in seconds.
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
}

/// Shadow operation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShadowSettings {
    /// Deadline for each get/update operation in milliseconds.
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_ms: u64,

    /// Fetch every registered shadow's document after each connect.
    #[serde(default = "default_fetch_on_connect")]
    pub fetch_on_connect: bool,

    /// Delay between the connected transition and the fetch pass, giving
    /// subscriptions time to settle on the endpoint.
    #[serde(default = "default_fetch_delay")]
    pub fetch_delay_ms: u64,
}

// =============================================================================
// Defaults
// =============================================================================

fn generate_client_id() -> String {
    Uuid::new_v4().to_string()
}

fn default_client_name() -> String {
    "umbra-client".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_initial_backoff() -> u64 {
    500
}

fn default_max_backoff() -> u64 {
    60
}

fn default_ping_interval() -> u64 {
    30
}

fn default_operation_timeout() -> u64 {
    10_000
}

fn default_fetch_on_connect() -> bool {
    true
}

fn default_fetch_delay() -> u64 {
    2_500
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            id: generate_client_id(),
            name: default_client_name(),
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        EndpointConfig {
            url: String::new(),
            connect_timeout_secs: default_connect_timeout(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
            max_retries: 0,
            ping_interval_secs: default_ping_interval(),
        }
    }
}

impl Default for ShadowSettings {
    fn default() -> Self {
        ShadowSettings {
            operation_timeout_ms: default_operation_timeout(),
            fetch_on_connect: default_fetch_on_connect(),
            fetch_delay_ms: default_fetch_delay(),
        }
    }
}

impl Default for ShadowConfig {
    fn default() -> Self {
        ShadowConfig {
            client: ClientConfig::default(),
            endpoint: EndpointConfig::default(),
            shadow: ShadowSettings::default(),
        }
    }
}

// =============================================================================
// Loading and Saving
// =============================================================================

impl ShadowConfig {
    /// Returns the platform config file path.
    pub fn config_path() -> ShadowResult<PathBuf> {
        let dirs = directories::ProjectDirs::from("io", "umbra", "umbra")
            .ok_or_else(|| ShadowError::ConfigLoadFailed("No home directory found".into()))?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Loads configuration from the platform config file.
    pub fn load() -> ShadowResult<Self> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    /// Loads configuration from a specific path, then applies environment
    /// overrides.
    pub fn load_from(path: &std::path::Path) -> ShadowResult<Self> {
        debug!(path = %path.display(), "Loading config");
        let contents = std::fs::read_to_string(path)?;
        let mut config: ShadowConfig = toml::from_str(&contents)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration, falling back to defaults (plus environment
    /// overrides) when no file exists.
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(config) => config,
            Err(e) => {
                debug!(%e, "No config file, using defaults");
                let mut config = ShadowConfig::default();
                config.apply_env_overrides();
                config
            }
        }
    }

    /// Saves configuration to the platform config file.
    pub fn save(&self) -> ShadowResult<()> {
        let path = Self::config_path()?;
        self.save_to(&path)
    }

    /// Saves configuration to a specific path.
    pub fn save_to(&self, path: &std::path::Path) -> ShadowResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        info!(path = %path.display(), "Config saved");
        Ok(())
    }

    /// Applies `UMBRA_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("UMBRA_ENDPOINT_URL") {
            self.endpoint.url = url;
        }
        if let Ok(id) = std::env::var("UMBRA_CLIENT_ID") {
            self.client.id = id;
        }
        if let Ok(name) = std::env::var("UMBRA_CLIENT_NAME") {
            self.client.name = name;
        }
        if let Ok(timeout) = std::env::var("UMBRA_OPERATION_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                self.shadow.operation_timeout_ms = ms;
            }
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> ShadowResult<()> {
        if self.client.id.is_empty() {
            return Err(ShadowError::MissingClientId);
        }

        if self.endpoint.url.is_empty() {
            return Err(ShadowError::InvalidConfig("Endpoint URL not set".into()));
        }
        let url = Url::parse(&self.endpoint.url)?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(ShadowError::InvalidUrl(format!(
                    "Unsupported scheme '{}', expected ws or wss",
                    other
                )));
            }
        }

        if self.shadow.operation_timeout_ms == 0 {
            return Err(ShadowError::InvalidConfig(
                "Operation timeout must be non-zero".into(),
            ));
        }

        Ok(())
    }

    /// Derives the transport configuration.
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            url: self.endpoint.url.clone(),
            client_id: self.client.id.clone(),
            connect_timeout: Duration::from_secs(self.endpoint.connect_timeout_secs),
            initial_backoff: Duration::from_millis(self.endpoint.initial_backoff_ms),
            max_backoff: Duration::from_secs(self.endpoint.max_backoff_secs),
            max_retries: self.endpoint.max_retries,
            ping_interval: Duration::from_secs(self.endpoint.ping_interval_secs),
        }
    }

    /// Deadline for each shadow operation.
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.shadow.operation_timeout_ms)
    }

    /// Delay before the post-connect fetch pass.
    pub fn fetch_delay(&self) -> Duration {
        Duration::from_millis(self.shadow.fetch_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ShadowConfig::default();
        assert!(!config.client.id.is_empty());
        assert_eq!(config.shadow.operation_timeout_ms, 10_000);
        assert!(config.shadow.fetch_on_connect);
        assert_eq!(config.shadow.fetch_delay_ms, 2_500);
        assert_eq!(config.endpoint.max_retries, 0);
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
            [endpoint]
            url = "wss://shadows.example.com/things"

            [shadow]
            operation_timeout_ms = 5000
        "#;

        let config: ShadowConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.endpoint.url, "wss://shadows.example.com/things");
        assert_eq!(config.shadow.operation_timeout_ms, 5000);
        // Omitted sections and fields fall back to defaults
        assert_eq!(config.endpoint.connect_timeout_secs, 10);
        assert!(!config.client.id.is_empty());
    }

    #[test]
    fn test_validate_rejects_missing_url() {
        let config = ShadowConfig::default();
        let err = config.validate().unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_validate_rejects_non_websocket_scheme() {
        let mut config = ShadowConfig::default();
        config.endpoint.url = "https://shadows.example.com".into();
        assert!(config.validate().is_err());

        config.endpoint.url = "wss://shadows.example.com/things".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_transport_config_derivation() {
        let mut config = ShadowConfig::default();
        config.endpoint.url = "wss://shadows.example.com/things".into();
        config.client.id = "register-1".into();

        let transport = config.transport_config();
        assert_eq!(transport.url, "wss://shadows.example.com/things");
        assert_eq!(transport.client_id, "register-1");
        assert_eq!(transport.connect_timeout, Duration::from_secs(10));
        assert_eq!(transport.initial_backoff, Duration::from_millis(500));
    }

    #[test]
    fn test_roundtrip_through_file() {
        let dir = std::env::temp_dir().join(format!("umbra-config-{}", Uuid::new_v4()));
        let path = dir.join("config.toml");

        let mut config = ShadowConfig::default();
        config.endpoint.url = "wss://shadows.example.com/things".into();
        config.save_to(&path).unwrap();

        let loaded = ShadowConfig::load_from(&path).unwrap();
        assert_eq!(loaded.client.id, config.client.id);
        assert_eq!(loaded.endpoint.url, config.endpoint.url);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
