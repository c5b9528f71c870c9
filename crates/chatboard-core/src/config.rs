//! Client configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::BackoffPolicy;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Endpoints and tuning for a chat client. Every field has a default, so a
/// config file only needs the values it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub host: String,
    /// Use `wss`/`https` on `secure_port` instead of `ws`/`http` on `plain_port`.
    pub secure: bool,
    pub plain_port: u16,
    pub secure_port: u16,
    pub chat_path: String,
    pub max_reconnect_attempts: u32,
    pub base_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub typing_timeout_ms: u64,
    pub canvas_width: u32,
    pub canvas_height: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            secure: false,
            plain_port: 7070,
            secure_port: 7443,
            chat_path: "/chat".to_string(),
            max_reconnect_attempts: 6,
            base_retry_delay_ms: 1000,
            max_retry_delay_ms: 30_000,
            typing_timeout_ms: 3000,
            canvas_width: 960,
            canvas_height: 600,
        }
    }
}

impl ClientConfig {
    /// Load from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config = serde_json::from_str(&text)?;
        log::info!("Loaded config from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn with_canvas_size(mut self, width: u32, height: u32) -> Self {
        self.canvas_width = width;
        self.canvas_height = height;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    fn port(&self) -> u16 {
        if self.secure {
            self.secure_port
        } else {
            self.plain_port
        }
    }

    /// WebSocket endpoint, e.g. `ws://localhost:7070/chat`.
    pub fn realtime_url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{}://{}:{}{}", scheme, self.host, self.port(), self.chat_path)
    }

    /// HTTP base, e.g. `http://localhost:7070`.
    pub fn http_base(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port())
    }

    pub fn upload_url(&self) -> String {
        format!("{}/upload", self.http_base())
    }

    pub fn voice_upload_url(&self) -> String {
        format!("{}/upload-voice", self.http_base())
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: self.max_reconnect_attempts,
            base_delay: Duration::from_millis(self.base_retry_delay_ms),
            max_delay: Duration::from_millis(self.max_retry_delay_ms),
        }
    }

    pub fn typing_timeout(&self) -> Duration {
        Duration::from_millis(self.typing_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_endpoints() {
        let config = ClientConfig::default();
        assert_eq!(config.realtime_url(), "ws://localhost:7070/chat");
        assert_eq!(config.upload_url(), "http://localhost:7070/upload");
        assert_eq!(config.voice_upload_url(), "http://localhost:7070/upload-voice");
        assert_eq!(config.backoff_policy(), BackoffPolicy::default());
    }

    #[test]
    fn test_secure_endpoints() {
        let config = ClientConfig::default()
            .with_host("chat.example.com")
            .with_secure(true);
        assert_eq!(config.realtime_url(), "wss://chat.example.com:7443/chat");
        assert_eq!(config.upload_url(), "https://chat.example.com:7443/upload");
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.json");
        std::fs::write(&path, r#"{ "host": "10.0.0.5", "typing_timeout_ms": 1500 }"#).unwrap();

        let config = ClientConfig::from_file(&path).unwrap();
        assert_eq!(config.host, "10.0.0.5");
        assert_eq!(config.typing_timeout(), Duration::from_millis(1500));
        assert_eq!(config.plain_port, 7070);
        assert_eq!(config.max_reconnect_attempts, 6);
    }

    #[test]
    fn test_bad_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.json");
        std::fs::write(&path, "{ host: }").unwrap();
        assert!(matches!(ClientConfig::from_file(&path), Err(ConfigError::Parse(_))));
        assert!(matches!(
            ClientConfig::from_file(dir.path().join("missing.json")),
            Err(ConfigError::Io(_))
        ));
    }
}
