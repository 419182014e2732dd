//! Client configuration.
//!
//! Configuration can be passed in directly or loaded from:
//! - The file named by `SPACEBRO_SETTINGS`
//! - `spacebro.toml` in the working directory
//! - `~/.config/spacebro/spacebro.toml`
//!
//! ```toml
//! channelName = "media-stream"
//! sendBack = false
//!
//! [client]
//! name = "player"
//! description = "video player"
//!
//! [transport]
//! encoding = "msgpack"
//! connectTimeoutMs = 5000
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use spacebro_core::Hook;
use spacebro_protocol::{ClientInfo, Encoding};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

#[cfg(feature = "websocket")]
use spacebro_transport::WebSocketConfig;

/// Environment variable naming an explicit settings file.
pub const SETTINGS_ENV: &str = "SPACEBRO_SETTINGS";

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// Channel to join; `None` is the broker's default channel.
    #[serde(default)]
    pub channel_name: Option<String>,

    /// Identity announced to the broker.
    #[serde(default)]
    pub client: ClientInfo,

    /// Whether to deliver events this client sent itself.
    #[serde(default = "default_true")]
    pub send_back: bool,

    /// Log connection lifecycle and traffic at info level.
    #[serde(default = "default_true")]
    pub verbose: bool,

    /// Accepted and ignored.
    #[serde(default)]
    pub multi_service: bool,

    /// Deprecated top-level name; folded into `client.name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,

    /// WebSocket connection settings.
    #[serde(default)]
    pub transport: TransportSettings,

    /// Outgoing hooks installed at construction.
    #[serde(skip)]
    pub packers: Vec<Hook>,

    /// Incoming hooks installed at construction.
    #[serde(skip)]
    pub unpackers: Vec<Hook>,
}

/// WebSocket connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportSettings {
    /// Connection attempt timeout in milliseconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Reconnect after failures and drops.
    #[serde(default = "default_true")]
    pub reconnection: bool,

    /// Give up after this many consecutive attempts; unbounded when absent.
    #[serde(default)]
    pub reconnection_attempts: Option<u32>,

    /// First reconnection delay in milliseconds.
    #[serde(default = "default_reconnection_delay")]
    pub reconnection_delay_ms: u64,

    /// Reconnection delay ceiling in milliseconds.
    #[serde(default = "default_reconnection_delay_max")]
    pub reconnection_delay_max_ms: u64,

    /// Wire encoding of outgoing frames.
    #[serde(default)]
    pub encoding: Encoding,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_connect_timeout() -> u64 {
    20_000 // 20 seconds
}

fn default_reconnection_delay() -> u64 {
    1_000
}

fn default_reconnection_delay_max() -> u64 {
    5_000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            channel_name: None,
            client: ClientInfo::default(),
            send_back: true,
            verbose: true,
            multi_service: false,
            client_name: None,
            transport: TransportSettings::default(),
            packers: Vec::new(),
            unpackers: Vec::new(),
        }
    }
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout(),
            reconnection: true,
            reconnection_attempts: None,
            reconnection_delay_ms: default_reconnection_delay(),
            reconnection_delay_max_ms: default_reconnection_delay_max(),
            encoding: Encoding::default(),
        }
    }
}

impl TransportSettings {
    /// Build the WebSocket transport configuration.
    #[cfg(feature = "websocket")]
    #[must_use]
    pub fn websocket_config(&self) -> WebSocketConfig {
        WebSocketConfig {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            reconnection: self.reconnection,
            reconnection_attempts: self.reconnection_attempts,
            reconnection_delay: Duration::from_millis(self.reconnection_delay_ms),
            reconnection_delay_max: Duration::from_millis(self.reconnection_delay_max_ms),
            encoding: self.encoding,
            ..WebSocketConfig::default()
        }
    }

    /// Connection attempt timeout.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl ClientConfig {
    /// Configuration for a named client on a channel, other fields default.
    #[must_use]
    pub fn new(channel_name: impl Into<String>, client_name: impl Into<String>) -> Self {
        Self {
            channel_name: Some(channel_name.into()),
            client: ClientInfo::named(client_name),
            ..Self::default()
        }
    }

    /// Install an outgoing hook.
    #[must_use]
    pub fn with_packer(mut self, hook: Hook) -> Self {
        self.packers.push(hook);
        self
    }

    /// Install an incoming hook.
    #[must_use]
    pub fn with_unpacker(mut self, hook: Hook) -> Self {
        self.unpackers.push(hook);
        self
    }

    /// Load configuration from the settings file, if one exists.
    ///
    /// # Errors
    ///
    /// Returns an error if a settings file exists but cannot be parsed.
    pub fn load() -> Result<Option<Self>> {
        if let Ok(path) = std::env::var(SETTINGS_ENV) {
            let expanded = shellexpand::tilde(&path);
            return Self::from_file(expanded.as_ref()).map(Some);
        }

        let config_paths = ["spacebro.toml", "~/.config/spacebro/spacebro.toml"];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref()).map(Some);
            }
        }

        Ok(None)
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;

        let config: ClientConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse settings file: {}", path.display()))?;

        Ok(config)
    }

    /// Fold the deprecated top-level `client_name` into `client.name`.
    ///
    /// The deprecated field wins when both are set.
    pub(crate) fn normalize(&mut self) {
        if let Some(name) = self.client_name.take() {
            warn!("DEPRECATED: clientName is deprecated, please use client.name instead");
            self.client.name = Some(name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert!(config.channel_name.is_none());
        assert!(config.client.name.is_none());
        assert!(config.send_back);
        assert!(config.verbose);
        assert!(!config.multi_service);
        assert!(config.packers.is_empty());
        assert_eq!(config.transport.connect_timeout(), Duration::from_secs(20));
    }

    #[test]
    fn test_parse_settings() {
        let config: ClientConfig = toml::from_str(
            r#"
            channelName = "media-stream"
            sendBack = false

            [client]
            name = "player"
            description = "video player"

            [transport]
            encoding = "msgpack"
            reconnectionAttempts = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.channel_name.as_deref(), Some("media-stream"));
        assert_eq!(config.client.name.as_deref(), Some("player"));
        assert_eq!(
            config.client.extra.get("description").and_then(|v| v.as_str()),
            Some("video player")
        );
        assert!(!config.send_back);
        assert!(config.verbose);
        assert_eq!(config.transport.encoding, Encoding::MessagePack);
        assert_eq!(config.transport.reconnection_attempts, Some(3));
        assert_eq!(config.transport.reconnection_delay_ms, 1_000);
    }

    #[test]
    fn test_normalize_deprecated_name() {
        let mut config = ClientConfig {
            client_name: Some("legacy".into()),
            ..ClientConfig::default()
        };
        config.normalize();
        assert_eq!(config.client.name.as_deref(), Some("legacy"));
        assert!(config.client_name.is_none());

        let mut config = ClientConfig {
            client_name: Some("legacy".into()),
            ..ClientConfig::new("room", "current")
        };
        config.normalize();
        assert_eq!(config.client.name.as_deref(), Some("legacy"));
        assert!(config.client_name.is_none());
    }

    #[test]
    fn test_from_file() {
        let path = std::env::temp_dir().join(format!("spacebro-{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "channelName = \"lobby\"\nverbose = false").unwrap();
        drop(file);

        let config = ClientConfig::from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.channel_name.as_deref(), Some("lobby"));
        assert!(!config.verbose);
    }

    #[test]
    fn test_from_missing_file() {
        let err = ClientConfig::from_file("/nonexistent/spacebro.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read settings file"));
    }

    #[cfg(feature = "websocket")]
    #[test]
    fn test_websocket_config() {
        let settings = TransportSettings {
            reconnection_delay_ms: 250,
            reconnection: false,
            ..TransportSettings::default()
        };
        let ws = settings.websocket_config();
        assert_eq!(ws.reconnection_delay, Duration::from_millis(250));
        assert!(!ws.reconnection);
        assert_eq!(ws.connect_timeout, Duration::from_secs(20));
    }
}
