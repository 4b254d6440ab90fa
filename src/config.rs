//! Configuration System using Figment
//!
//! Configuration is loaded from:
//! 1. `config/tcb.toml` (or a path given on the command line)
//! 2. Environment variables prefixed with `LFDI_TCB_`, nested keys split on `__`
//!
//! Every field has a default, so a missing or empty file is a valid
//! configuration for a stock board on `/dev/ttyUSB0`.
//!
//! # Example
//! ```no_run
//! use lfdi_tcb::config::TcbConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TcbConfig::load()?;
//! config.validate()?;
//! println!("Board on {}", config.serial.port);
//! # Ok(())
//! # }
//! ```
//!
//! Override the port from the shell with `LFDI_TCB_SERIAL__PORT=/dev/ttyACM0`.

use crate::error::{AppResult, TcbError};
use crate::tcb::entities::EntityCounts;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default location of the configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/tcb.toml";

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "LFDI_TCB_";

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const VALID_FORMATS: [&str; 3] = ["pretty", "compact", "json"];

/// Top-level driver configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcbConfig {
    /// Serial link settings
    pub serial: SerialConfig,
    /// Command/response timing and retry policy
    pub protocol: ProtocolConfig,
    /// How many of each entity the board carries
    pub entities: EntityCounts,
    /// Log output
    pub logging: LoggingConfig,
}

/// Serial port settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Port name (e.g., "/dev/ttyUSB0", "COM6")
    pub port: String,
    /// Baud rate (the firmware default is 9600)
    pub baud_rate: u32,
    /// Upper bound on waiting for a reply
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,
    /// Longest a single command write may block
    #[serde(with = "humantime_serde")]
    pub write_timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            read_timeout: Duration::from_secs(1),
            write_timeout: Duration::from_secs(1),
        }
    }
}

/// Protocol timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Wait between writing a command and reading its reply
    #[serde(with = "humantime_serde")]
    pub settle_interval: Duration,
    /// Wait after `bounce` for the board to come back
    #[serde(with = "humantime_serde")]
    pub reset_settle: Duration,
    /// Re-sends after the first attempt before reconnecting
    pub max_retries: u32,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            settle_interval: Duration::from_millis(500),
            reset_settle: Duration::from_secs(10),
            max_retries: 3,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format (pretty, compact, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl TcbConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path and the environment.
    ///
    /// A missing file is not an error; defaults and environment overrides
    /// still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config = Self::figment(path.as_ref()).extract()?;
        Ok(config)
    }

    fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let level = self.logging.level.to_lowercase();
        if !VALID_LEVELS.contains(&level.as_str()) {
            return Err(TcbError::Configuration(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                VALID_LEVELS.join(", ")
            )));
        }

        let format = self.logging.format.to_lowercase();
        if !VALID_FORMATS.contains(&format.as_str()) {
            return Err(TcbError::Configuration(format!(
                "Invalid log format '{}'. Must be one of: {}",
                self.logging.format,
                VALID_FORMATS.join(", ")
            )));
        }

        if self.serial.baud_rate == 0 {
            return Err(TcbError::Configuration(
                "serial.baud_rate must be greater than zero".to_string(),
            ));
        }

        if self.serial.read_timeout.is_zero() {
            return Err(TcbError::Configuration(
                "serial.read_timeout must be greater than zero".to_string(),
            ));
        }

        if self.entities.controllers == 0 || self.entities.compensators == 0 {
            return Err(TcbError::Configuration(
                "board must have at least one controller and one compensator".to_string(),
            ));
        }

        if self.protocol.max_retries > 10 {
            return Err(TcbError::Configuration(format!(
                "Invalid max_retries {}. Must be 0-10",
                self.protocol.max_retries
            )));
        }

        Ok(())
    }
}
