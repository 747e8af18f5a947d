//! Configuration management for the cursor core
//!
//! This module handles loading, parsing, and validating configuration from various sources:
//! - Configuration files (TOML format)
//! - Environment variables
//!
//! Configuration precedence (highest to lowest):
//! 1. Environment variables
//! 2. Configuration file
//! 3. Default values

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use crate::error::{ConfigError, Result};
use crate::operation::default_client_id;
use crate::timeout::{DeadlineContext, TimeoutMode};

const ENV_BATCH_SIZE: &str = "MONGOSH_CURSOR_BATCH_SIZE";
const ENV_MAX_AWAIT_TIME_MS: &str = "MONGOSH_CURSOR_MAX_AWAIT_TIME_MS";
const ENV_KILL_CURSORS_TIMEOUT_MS: &str = "MONGOSH_CURSOR_KILL_CURSORS_TIMEOUT_MS";
const ENV_TIMEOUT_MS: &str = "MONGOSH_CURSOR_TIMEOUT_MS";
const ENV_TIMEOUT_MODE: &str = "MONGOSH_CURSOR_TIMEOUT_MODE";
const ENV_LOG_LEVEL: &str = "MONGOSH_CURSOR_LOG_LEVEL";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Cursor behaviour defaults
    #[serde(default)]
    pub cursor: CursorConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Defaults applied to every cursor built from this configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CursorConfig {
    /// Batch size requested when the caller does not set one (0 lets the server decide)
    #[serde(default)]
    pub default_batch_size: i32,

    /// How long a tailable await cursor may wait for new data per get-more, in milliseconds
    #[serde(default = "default_max_await_time_ms")]
    pub max_await_time_ms: u64,

    /// Ceiling for the kill-cursors round trip on close, in milliseconds
    #[serde(default = "default_kill_cursors_timeout_ms")]
    pub kill_cursors_timeout_ms: u64,

    /// Overall operation timeout in milliseconds (None for no deadline)
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Whether the overall timeout spans the cursor or each iteration
    #[serde(default)]
    pub timeout_mode: TimeoutMode,

    /// Identifier embedded in operation comments
    #[serde(default = "default_client_id")]
    pub client_id: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    /// Enable timestamps in logs
    #[serde(default = "default_log_timestamps")]
    pub timestamps: bool,
}

/// Log level options
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

// Default value functions
pub(crate) fn default_max_await_time_ms() -> u64 {
    1000
}

pub(crate) fn default_kill_cursors_timeout_ms() -> u64 {
    1000
}

fn default_log_level() -> LogLevel {
    LogLevel::Warn
}

fn default_log_timestamps() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cursor: CursorConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for CursorConfig {
    fn default() -> Self {
        Self {
            default_batch_size: 0,
            max_await_time_ms: default_max_await_time_ms(),
            kill_cursors_timeout_ms: default_kill_cursors_timeout_ms(),
            timeout_ms: None,
            timeout_mode: TimeoutMode::default(),
            client_id: default_client_id(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            timestamps: default_log_timestamps(),
        }
    }
}

impl Config {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a file
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file (TOML format)
    ///
    /// # Returns
    /// * `Result<Config>` - Loaded configuration or error
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound(path.display().to_string()).into()
            } else {
                crate::error::CursorError::Io(e)
            }
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration from multiple sources with proper precedence
    ///
    /// A missing default file is not an error.
    ///
    /// # Returns
    /// * `Result<Config>` - Merged and validated configuration or error
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables on top of the defaults
    ///
    /// Recognised variables are prefixed with MONGOSH_CURSOR_
    /// Example: MONGOSH_CURSOR_BATCH_SIZE=50
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Override fields from variables resolved through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_BATCH_SIZE) {
            self.cursor.default_batch_size = parse_env(ENV_BATCH_SIZE, &value)?;
        }
        if let Some(value) = lookup(ENV_MAX_AWAIT_TIME_MS) {
            self.cursor.max_await_time_ms = parse_env(ENV_MAX_AWAIT_TIME_MS, &value)?;
        }
        if let Some(value) = lookup(ENV_KILL_CURSORS_TIMEOUT_MS) {
            self.cursor.kill_cursors_timeout_ms = parse_env(ENV_KILL_CURSORS_TIMEOUT_MS, &value)?;
        }
        if let Some(value) = lookup(ENV_TIMEOUT_MS) {
            self.cursor.timeout_ms = Some(parse_env(ENV_TIMEOUT_MS, &value)?);
        }
        if let Some(value) = lookup(ENV_TIMEOUT_MODE) {
            self.cursor.timeout_mode =
                TimeoutMode::parse(&value).ok_or_else(|| invalid(ENV_TIMEOUT_MODE, &value))?;
        }
        if let Some(value) = lookup(ENV_LOG_LEVEL) {
            self.logging.level =
                LogLevel::parse(&value).ok_or_else(|| invalid(ENV_LOG_LEVEL, &value))?;
        }
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// # Returns
    /// * `PathBuf` - Path to default configuration file
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".mongosh")
            .join("cursor.toml")
    }

    /// Save configuration to a file, creating parent directories as needed
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::InvalidFormat(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration
    ///
    /// # Returns
    /// * `Result<()>` - Ok if valid, error otherwise
    pub fn validate(&self) -> Result<()> {
        if self.cursor.default_batch_size < 0 {
            return Err(invalid(
                "cursor.default_batch_size",
                &self.cursor.default_batch_size.to_string(),
            ));
        }
        if self.cursor.kill_cursors_timeout_ms == 0 {
            return Err(invalid("cursor.kill_cursors_timeout_ms", "0"));
        }
        Ok(())
    }
}

impl CursorConfig {
    /// Get await time as Duration
    pub fn max_await_time(&self) -> Duration {
        Duration::from_millis(self.max_await_time_ms)
    }

    /// Get kill-cursors timeout as Duration
    pub fn kill_cursors_timeout(&self) -> Duration {
        Duration::from_millis(self.kill_cursors_timeout_ms)
    }

    /// Get overall operation timeout as Duration
    pub fn operation_timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Start a deadline for a new operation
    pub fn new_deadline(&self) -> DeadlineContext {
        DeadlineContext::new(self.operation_timeout())
    }
}

impl LoggingConfig {
    /// Install a global fmt subscriber filtered at the configured level
    ///
    /// `RUST_LOG` takes precedence when set. Returns false when a subscriber
    /// was already installed.
    pub fn init_tracing(&self) -> bool {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| self.default_filter());
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false);

        if self.timestamps {
            builder.try_init().is_ok()
        } else {
            builder.without_time().try_init().is_ok()
        }
    }

    /// Filter at the configured level, used when `RUST_LOG` is unset
    fn default_filter(&self) -> EnvFilter {
        EnvFilter::builder()
            .with_default_directive(LevelFilter::from_level(self.level.to_tracing_level()).into())
            .parse_lossy("")
    }
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "error" => Some(LogLevel::Error),
            "warn" | "warning" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            "trace" => Some(LogLevel::Trace),
            _ => None,
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| invalid(key, value))
}

fn invalid(field: &str, value: &str) -> crate::error::CursorError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    }
    .into()
}
