//! Configuration management for plansign
//!
//! Settings are read from an optional TOML file, then overridden by
//! `PLANSIGN_*` environment variables, then validated. Every section has
//! defaults so an empty file (or no file at all) is a working setup.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("IO error reading config file: {message}")]
    IoError { message: String },

    #[error("Configuration parsing error: {message}")]
    ParseError { message: String },
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub review: ReviewConfig,
    pub client: ClientConfig,
    pub verification: VerificationConfig,
    pub signing: SigningConfig,
    pub terraform: TerraformConfig,
    pub logging: LoggingConfig,
}

/// Review service listener
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound on a single uploaded plan or signature
    pub max_body_bytes: usize,
}

/// Where submissions and the lockdown flag live
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ReviewConfig {
    /// JSON reviewer allow-list. Without one, approvals are unauthenticated.
    pub reviewers_file: Option<PathBuf>,
}

/// Remote client settings used by `submit`, `admin` and `lockdown`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub service_url: String,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub wait_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    /// Maximum age of a plan, measured from its provenance `buildFinishedOn`
    #[serde(with = "humantime_serde")]
    pub freshness_threshold: Duration,
}

/// External signing tool
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    pub cosign_binary: String,
    pub timeout_seconds: u64,
}

/// External planning tool
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerraformConfig {
    pub binary: String,
    /// Initialized working directory (`terraform show` needs providers)
    pub working_dir: Option<PathBuf>,
    pub timeout_seconds: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            max_body_bytes: 64 * 1024 * 1024, // 64MB
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./plansign-data"),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            service_url: "http://localhost:8080".to_string(),
            poll_interval: Duration::from_secs(5),
            wait_timeout: Duration::from_secs(30 * 60),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            freshness_threshold: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            cosign_binary: "cosign".to_string(),
            timeout_seconds: 120,
        }
    }
}

impl Default for TerraformConfig {
    fn default() -> Self {
        Self {
            binary: "terraform".to_string(),
            working_dir: None,
            timeout_seconds: 300,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

impl Config {
    /// Defaults plus environment overrides
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load configuration from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            message: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?;

        Ok(config)
    }

    /// File (if given), then environment, then validation
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay `PLANSIGN_*` variables onto the current values
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(host) = env::var("PLANSIGN_HOST") {
            self.server.host = host;
        }

        if let Ok(port) = env::var("PLANSIGN_PORT") {
            self.server.port = port.parse().map_err(|_| ConfigError::InvalidValue {
                key: "PLANSIGN_PORT".to_string(),
                reason: "Invalid port number".to_string(),
            })?;
        }

        if let Ok(dir) = env::var("PLANSIGN_STORAGE_DIR") {
            self.storage.root = PathBuf::from(dir);
        }

        if let Ok(file) = env::var("PLANSIGN_REVIEWERS_FILE") {
            self.review.reviewers_file = Some(PathBuf::from(file));
        }

        if let Ok(url) = env::var("PLANSIGN_SERVICE_URL") {
            self.client.service_url = url;
        }

        if let Ok(interval) = env::var("PLANSIGN_POLL_INTERVAL") {
            self.client.poll_interval = parse_duration("PLANSIGN_POLL_INTERVAL", &interval)?;
        }

        if let Ok(threshold) = env::var("PLANSIGN_FRESHNESS_THRESHOLD") {
            self.verification.freshness_threshold =
                parse_duration("PLANSIGN_FRESHNESS_THRESHOLD", &threshold)?;
        }

        if let Ok(binary) = env::var("PLANSIGN_COSIGN_BINARY") {
            self.signing.cosign_binary = binary;
        }

        if let Ok(binary) = env::var("PLANSIGN_TERRAFORM_BINARY") {
            self.terraform.binary = binary;
        }

        if let Ok(level) = env::var("PLANSIGN_LOG_LEVEL") {
            self.logging.level = level;
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidValue {
                key: "server.port".to_string(),
                reason: "Port cannot be 0".to_string(),
            });
        }

        if self.server.max_body_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                key: "server.max_body_bytes".to_string(),
                reason: "Body limit must be > 0".to_string(),
            });
        }

        if self.storage.root.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "storage.root".to_string(),
                reason: "Storage root cannot be empty".to_string(),
            });
        }

        if self.client.poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "client.poll_interval".to_string(),
                reason: "Poll interval must be > 0".to_string(),
            });
        }

        if self.verification.freshness_threshold.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "verification.freshness_threshold".to_string(),
                reason: "Freshness threshold must be > 0".to_string(),
            });
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::InvalidValue {
                key: "logging.level".to_string(),
                reason: format!("Must be one of: {}", valid_levels.join(", ")),
            });
        }

        Ok(())
    }

    /// `host:port` for the listener
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn parse_duration(key: &str, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        reason: e.to_string(),
    })
}
