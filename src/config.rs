// Configuration File Support
//
// Client settings are read from TOML with environment variable overrides.
// The default location is the XDG config directory:
// ~/.config/yavirt-client/config.toml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::client::ClientOptions;
use crate::retry::RetryConfig;
use crate::uri::Endpoint;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// yavirtd address (`http://host:port/v1` or `grpc://host:port`)
    pub uri: String,

    /// Unary request timeout in seconds
    pub timeout_secs: u64,

    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,

    /// Retry configuration
    pub retry: RetrySettings,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            uri: "grpc://127.0.0.1:9697".to_string(),
            timeout_secs: 30,
            connect_timeout_secs: 5,
            retry: RetrySettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrySettings {
    /// Whether idempotent reads are retried
    pub enabled: bool,

    /// Maximum attempts including the first
    pub max_attempts: usize,

    /// Base backoff delay in milliseconds
    pub base_delay_ms: u64,

    /// Maximum backoff delay in milliseconds
    pub max_delay_ms: u64,

    /// Jitter factor (0.0 - 1.0)
    pub jitter: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let defaults = RetryConfig::default();
        Self {
            enabled: true,
            max_attempts: defaults.max_attempts,
            base_delay_ms: defaults.base_delay.as_millis() as u64,
            max_delay_ms: defaults.max_delay.as_millis() as u64,
            jitter: defaults.jitter,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: "compact".to_string(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from the default XDG config directory
    ///
    /// If the config file does not exist, defaults (with environment
    /// overrides) are returned.
    pub fn load() -> Result<Self> {
        Self::load_from_path(Self::config_path())
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or
    /// if the resulting configuration is invalid.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Self::read_from_path(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Read the file and apply environment overrides without validating
    ///
    /// For callers that apply further overrides (such as command line
    /// flags) before calling [`ClientConfig::validate`].
    pub fn read_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file from {:?}", path))?;
            let config: ClientConfig = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file from {:?}", path))?;
            tracing::debug!("Loaded configuration from {:?}", path);
            config
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            Self::default()
        };

        Ok(config.apply_env_overrides())
    }

    /// Get the default configuration file path
    pub fn config_path() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "yavirt-client") {
            proj_dirs.config_dir().join("config.toml")
        } else {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home)
                .join(".config")
                .join("yavirt-client")
                .join("config.toml")
        }
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// - YAVIRT_URI
    /// - YAVIRT_TIMEOUT_SECS
    /// - YAVIRT_CONNECT_TIMEOUT_SECS
    /// - YAVIRT_RETRY_ENABLED
    /// - YAVIRT_RETRY_MAX_ATTEMPTS
    /// - YAVIRT_LOG_LEVEL
    /// - YAVIRT_LOG_FORMAT
    fn apply_env_overrides(self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(uri) = lookup("YAVIRT_URI") {
            self.uri = uri;
        }
        if let Some(secs) = lookup("YAVIRT_TIMEOUT_SECS").and_then(|v| v.parse::<u64>().ok()) {
            self.timeout_secs = secs;
        }
        if let Some(secs) =
            lookup("YAVIRT_CONNECT_TIMEOUT_SECS").and_then(|v| v.parse::<u64>().ok())
        {
            self.connect_timeout_secs = secs;
        }
        if let Some(enabled) = lookup("YAVIRT_RETRY_ENABLED") {
            self.retry.enabled = enabled.parse().unwrap_or(self.retry.enabled);
        }
        if let Some(attempts) =
            lookup("YAVIRT_RETRY_MAX_ATTEMPTS").and_then(|v| v.parse::<usize>().ok())
        {
            self.retry.max_attempts = attempts;
        }
        if let Some(level) = lookup("YAVIRT_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("YAVIRT_LOG_FORMAT") {
            self.logging.format = format;
        }
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        Endpoint::parse(&self.uri).with_context(|| format!("Invalid yavirtd URI: {}", self.uri))?;

        if self.timeout_secs == 0 {
            anyhow::bail!("Request timeout must be > 0");
        }
        if self.connect_timeout_secs == 0 {
            anyhow::bail!("Connect timeout must be > 0");
        }

        if self.retry.enabled {
            if self.retry.max_attempts == 0 {
                anyhow::bail!("Retry max_attempts must be > 0");
            }
            if self.retry.base_delay_ms > self.retry.max_delay_ms {
                anyhow::bail!("Retry base_delay_ms must not exceed max_delay_ms");
            }
            if !(0.0..=1.0).contains(&self.retry.jitter) {
                anyhow::bail!("Retry jitter must be between 0.0 and 1.0");
            }
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                self.logging.level
            ),
        }
        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => anyhow::bail!(
                "Invalid log format: {}. Must be one of: json, pretty, compact",
                self.logging.format
            ),
        }

        Ok(())
    }

    /// Convert log level string to tracing::Level
    pub fn log_level(&self) -> Result<tracing::Level> {
        self.logging
            .level
            .to_lowercase()
            .parse()
            .map_err(|e| anyhow::anyhow!("Failed to parse log level: {}", e))
    }

    /// Retry policy, if enabled
    pub fn retry_config(&self) -> Option<RetryConfig> {
        self.retry.enabled.then(|| {
            RetryConfig::new()
                .max_attempts(self.retry.max_attempts)
                .base_delay(Duration::from_millis(self.retry.base_delay_ms))
                .max_delay(Duration::from_millis(self.retry.max_delay_ms))
                .jitter(self.retry.jitter)
        })
    }

    /// Transport options derived from this configuration
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            timeout: Duration::from_secs(self.timeout_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            retry: self.retry_config(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.uri, "grpc://127.0.0.1:9697");
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.logging.level, "warn");
        assert!(config.retry.enabled);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_config_validation_valid() {
        assert!(ClientConfig::default().validate().is_ok());
    }

    #[test]
    fn test_config_validation_invalid_uri() {
        let mut config = ClientConfig::default();
        config.uri = "ftp://127.0.0.1".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_invalid_log_level() {
        let mut config = ClientConfig::default();
        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_invalid_log_format() {
        let mut config = ClientConfig::default();
        config.logging.format = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_timeout() {
        let mut config = ClientConfig::default();
        config.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_retry_bounds() {
        let mut config = ClientConfig::default();
        config.retry.base_delay_ms = 10_000;
        config.retry.max_delay_ms = 100;
        assert!(config.validate().is_err());

        // Disabled retry settings are not checked
        config.retry.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let config = ClientConfig::load_from_path("/nonexistent/yavirt-client.toml").unwrap();
        assert_eq!(config.timeout_secs, ClientConfig::default().timeout_secs);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
uri = "http://10.0.0.5:9696/v1"
timeout_secs = 10

[retry]
max_attempts = 5

[logging]
level = "debug"
format = "json"
"#
        )
        .unwrap();

        let config = ClientConfig::load_from_path(file.path()).unwrap();
        assert_eq!(config.timeout_secs, 10);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.logging.format, "json");
        // Unset fields keep their defaults
        assert_eq!(config.connect_timeout_secs, 5);
    }

    #[test]
    fn test_bad_file_uri_can_be_overridden() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"uri = "ftp://10.0.0.5""#).unwrap();

        assert!(ClientConfig::load_from_path(file.path()).is_err());

        let mut config = ClientConfig::read_from_path(file.path()).unwrap();
        assert!(config.validate().is_err());
        config.uri = "grpc://10.0.0.5:9697".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_invalid_toml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "uri = [not toml").unwrap();
        assert!(ClientConfig::load_from_path(file.path()).is_err());
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("YAVIRT_URI", "http://override:9696/v1"),
            ("YAVIRT_TIMEOUT_SECS", "7"),
            ("YAVIRT_RETRY_ENABLED", "false"),
            ("YAVIRT_LOG_LEVEL", "trace"),
            ("YAVIRT_CONNECT_TIMEOUT_SECS", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let config = ClientConfig::default()
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.uri, "http://override:9696/v1");
        assert_eq!(config.timeout_secs, 7);
        assert!(!config.retry.enabled);
        assert_eq!(config.logging.level, "trace");
        // Unparseable values are ignored
        assert_eq!(config.connect_timeout_secs, 5);
        assert!(config.retry_config().is_none());
    }

    #[test]
    fn test_client_options() {
        let mut config = ClientConfig::default();
        config.timeout_secs = 12;
        config.retry.max_attempts = 4;

        let options = config.client_options();
        assert_eq!(options.timeout, Duration::from_secs(12));
        assert_eq!(options.retry.unwrap().max_attempts, 4);
    }

    #[test]
    fn test_log_level() {
        let config = ClientConfig::default();
        assert_eq!(config.log_level().unwrap(), tracing::Level::WARN);
    }
}
