//! Server configuration.

use std::path::Path;

use portal_webhooks::WebhookConfig;
use serde::{Deserialize, Serialize};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "PORTAL_WEBHOOKS_CONFIG";

/// Server-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to listen on.
    pub port: u16,
    /// Host to bind to.
    pub host: String,
    /// Log level.
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "0.0.0.0".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// `host:port` to bind.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Complete configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// `[server]` table.
    pub server: ServerConfig,
    /// `[webhooks]` table.
    pub webhooks: WebhookConfig,
}

impl AppConfig {
    /// Parses a TOML document.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config
            .webhooks
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(config)
    }
}

/// Loads configuration from a TOML file.
pub fn load_config(path: impl AsRef<Path>) -> Result<AppConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
    AppConfig::from_toml(&content)
}

/// Loads the file named by `path`, falling back to [`CONFIG_ENV`], then to
/// defaults.
pub fn load_from(path: Option<String>) -> Result<AppConfig, ConfigError> {
    match path.or_else(|| std::env::var(CONFIG_ENV).ok()) {
        Some(path) => load_config(path),
        None => Ok(AppConfig::default()),
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.webhooks.max_attempts, 5);
    }

    #[test]
    fn test_parse_partial_file() {
        let config = AppConfig::from_toml(
            r#"
            [server]
            port = 9000

            [webhooks]
            max_attempts = 3
            retry_delays_secs = [2, 10]
            log_retention_days = 30
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.webhooks.max_attempts, 3);
        assert_eq!(config.webhooks.retry_delays_secs, vec![2, 10]);
        assert_eq!(config.webhooks.log_retention_days, Some(30));
        assert_eq!(config.webhooks.worker_count, 4);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = AppConfig::from_toml("[webhooks]\nworker_count = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = AppConfig::from_toml("[server]\nport = \"eighty\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }
}
