//! Logging configuration and initialization
//!
//! Console logging built on `tracing`. The `LOGGING` environment variable
//! (any truthy string) switches the service into verbose mode, matching the
//! behavior of the event entry point; `LOG_LEVEL` and `LOG_FORMAT` refine it.

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

use crate::error::{MirrorError, Result};

/// Environment variable enabling verbose output
pub const LOGGING_ENV_KEY: &str = "LOGGING";

/// Log level for filtering messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Debug-level logging for development
    Debug,
    /// Informational messages
    #[default]
    Info,
    /// Warning messages
    Warn,
    /// Error messages
    Error,
}

impl LogLevel {
    /// Convert to tracing Level
    pub fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = MirrorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "debug" | "trace" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(MirrorError::config(format!("Invalid log level: {}", s))),
        }
    }
}

/// Log format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// JSON format for structured logging
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = MirrorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(MirrorError::config(format!("Invalid log format: {}", s))),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: LogLevel,

    /// Log format (text or JSON)
    pub format: LogFormat,
}

impl LogConfig {
    /// Load configuration from environment variables
    ///
    /// `LOGGING` (truthy) raises the level to debug; `LOG_LEVEL` and
    /// `LOG_FORMAT` take precedence when set.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if is_logging_enabled() {
            config.level = LogLevel::Debug;
        }

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.level = level.parse()?;
        }

        if let Ok(format) = std::env::var("LOG_FORMAT") {
            config.format = format.parse()?;
        }

        Ok(config)
    }
}

/// Whether the `LOGGING` environment variable holds a truthy value
pub fn is_logging_enabled() -> bool {
    match std::env::var(LOGGING_ENV_KEY) {
        Ok(value) => matches!(
            value.to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}

/// Initialize the global tracing subscriber
///
/// Should only be called once at application startup; a second call returns
/// an error from the underlying registry, which callers may ignore.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive(config.level.to_tracing_level().into());

    let fmt_layer = fmt::layer().with_writer(std::io::stdout).with_target(true);

    let result = match config.format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer.json())
            .try_init(),
    };

    result.map_err(|e| MirrorError::config(format!("Failed to initialize logging: {}", e)))
}
