//! Tracing Infrastructure
//!
//! Structured logging for the driver and CLI, built on `tracing` and
//! `tracing-subscriber`:
//! - Multiple output formats (pretty, compact, JSON)
//! - `RUST_LOG` overrides the configured level
//! - Output goes to stderr so stdout stays clean for TSV snapshots
//!
//! # Example
//! ```no_run
//! use lfdi_tcb::{config::TcbConfig, logging};
//! use tracing::info;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TcbConfig::load()?;
//! logging::init_from_config(&config)?;
//! info!(port = %config.serial.port, "Connecting");
//! # Ok(())
//! # }
//! ```

use crate::config::TcbConfig;
use crate::error::{AppResult, TcbError};
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Output format for tracing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Pretty-printed format with colors (for development)
    Pretty,
    /// Compact single-line format without colors
    Compact,
    /// JSON format for structured logging
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = TcbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(OutputFormat::Pretty),
            "compact" => Ok(OutputFormat::Compact),
            "json" => Ok(OutputFormat::Json),
            _ => Err(TcbError::Configuration(format!(
                "Invalid log format '{}'. Must be one of: pretty, compact, json",
                s
            ))),
        }
    }
}

/// Tracing configuration options
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: Level,
    /// Output format
    pub format: OutputFormat,
    /// Whether to include span events (NEW, CLOSE)
    pub with_span_events: bool,
    /// Whether to include file and line numbers
    pub with_file_and_line: bool,
    /// Whether to enable ANSI colors (only for Pretty format)
    pub with_ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Pretty,
            with_span_events: false,
            with_file_and_line: false,
            with_ansi: true,
        }
    }
}

impl TracingConfig {
    /// Create tracing config from the `[logging]` section
    pub fn from_config(config: &TcbConfig) -> AppResult<Self> {
        Ok(Self::new(parse_log_level(&config.logging.level)?)
            .with_format(config.logging.format.parse()?))
    }

    /// Default settings at the given level
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Set output format
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Enable or disable span events
    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.with_span_events = enabled;
        self
    }

    /// Enable or disable ANSI colors
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }
}

/// Initialize tracing from the loaded configuration
pub fn init_from_config(config: &TcbConfig) -> AppResult<()> {
    init(TracingConfig::from_config(config)?)
}

/// Initialize tracing with custom configuration
///
/// Idempotent: if a global subscriber is already installed this returns
/// `Ok(())`, so tests and embedding applications can call it freely.
pub fn init(config: TracingConfig) -> AppResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));

    let span_events = if config.with_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let base = fmt::layer()
        .with_writer(std::io::stderr)
        .with_span_events(span_events)
        .with_file(config.with_file_and_line)
        .with_line_number(config.with_file_and_line);

    let layer = match config.format {
        OutputFormat::Pretty => base
            .pretty()
            .with_ansi(config.with_ansi)
            .with_filter(env_filter)
            .boxed(),
        OutputFormat::Compact => base
            .compact()
            .with_ansi(false)
            .with_filter(env_filter)
            .boxed(),
        OutputFormat::Json => base.json().with_filter(env_filter).boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .or_else(|e| {
            // A second init is expected in tests and when embedded.
            if e.to_string().contains("a global default trace dispatcher has already been set") {
                Ok(())
            } else {
                Err(TcbError::Configuration(format!(
                    "Failed to initialize tracing: {}",
                    e
                )))
            }
        })
}

/// Parse log level string into tracing Level
pub fn parse_log_level(level: &str) -> AppResult<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(TcbError::Configuration(format!(
            "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
            level
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert!(matches!(parse_log_level("trace"), Ok(Level::TRACE)));
        assert!(matches!(parse_log_level("debug"), Ok(Level::DEBUG)));
        assert!(matches!(parse_log_level("warn"), Ok(Level::WARN)));

        // Case insensitive
        assert!(matches!(parse_log_level("INFO"), Ok(Level::INFO)));

        assert!(parse_log_level("invalid").is_err());
    }

    #[test]
    fn test_tracing_config_from_config() {
        let mut config = TcbConfig::default();
        config.logging.level = "debug".to_string();
        config.logging.format = "json".to_string();

        let tracing_config = TracingConfig::from_config(&config).unwrap();
        assert_eq!(tracing_config.level, Level::DEBUG);
        assert_eq!(tracing_config.format, OutputFormat::Json);

        config.logging.format = "yaml".to_string();
        assert!(TracingConfig::from_config(&config).is_err());
    }

    #[test]
    fn test_tracing_config_builder() {
        let config = TracingConfig::new(Level::WARN)
            .with_format(OutputFormat::Compact)
            .with_span_events(true)
            .with_ansi(false);

        assert_eq!(config.level, Level::WARN);
        assert_eq!(config.format, OutputFormat::Compact);
        assert!(config.with_span_events);
        assert!(!config.with_ansi);
    }

    #[test]
    fn test_init_is_idempotent() {
        assert!(init(TracingConfig::new(Level::ERROR)).is_ok());
        assert!(init(TracingConfig::new(Level::ERROR)).is_ok());
    }

    #[test]
    fn test_config_format_with_command_line_overrides() {
        let mut config = TcbConfig::default();
        config.logging.level = "debug".to_string();
        config.logging.format = "json".to_string();

        let tracing = TracingConfig::from_config(&config)
            .unwrap()
            .with_ansi(false)
            .with_span_events(true);

        assert_eq!(tracing.level, Level::DEBUG);
        assert_eq!(tracing.format, OutputFormat::Json);
        assert!(!tracing.with_ansi);
        assert!(tracing.with_span_events);
    }
}
