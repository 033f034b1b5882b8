//! Configuration management for Turnstile.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, TurnstileError};
use crate::ratelimit::StoreConfig;

/// Prefix for environment variable overrides, e.g. `TURNSTILE_LIMITER__RATE`.
const ENV_PREFIX: &str = "TURNSTILE";

/// Main configuration for the Turnstile service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Rate limiting configuration
    #[serde(default)]
    pub limiter: LimiterSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimiterSettings {
    /// Tokens added per second to each visitor's bucket
    #[serde(default = "default_rate")]
    pub rate: f64,

    /// Bucket capacity per visitor
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Seconds a visitor may go unseen before eviction (0 selects the default)
    #[serde(default)]
    pub expires_in_secs: u64,

    /// Seconds between stale visitor sweeps
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            rate: default_rate(),
            burst: default_burst(),
            expires_in_secs: 0,
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

impl LimiterSettings {
    /// Build the store configuration. Rate and burst are validated by the store.
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::new(self.rate, self.burst)
            .with_expires_in(Duration::from_secs(self.expires_in_secs))
            .with_cleanup_interval(Duration::from_secs(self.cleanup_interval_secs))
    }
}

fn default_rate() -> f64 {
    1.0
}

fn default_burst() -> u32 {
    3
}

fn default_cleanup_interval() -> u64 {
    60
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON-formatted log lines
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TurnstileConfig {
    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from an optional file layered with environment overrides.
    ///
    /// The file format is taken from its extension (`.toml`, `.json`, YAML
    /// otherwise). Environment variables use the `TURNSTILE_` prefix and `__`
    /// between nested keys. An unreadable file is reported as
    /// [`TurnstileError::Io`].
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            let contents = std::fs::read_to_string(path)?;
            builder = builder.add_source(config::File::from_str(&contents, file_format(path)));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

fn file_format(path: &Path) -> config::FileFormat {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => config::FileFormat::Toml,
        Some("json") => config::FileFormat::Json,
        _ => config::FileFormat::Yaml,
    }
}
