//! Error types for the TCB driver.
//!
//! `TcbError` is the single error type that crosses the public API. Using the
//! `thiserror` crate it covers configuration problems, caller mistakes and the
//! one unrecoverable transport condition: a reconnect that itself fails.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment` while loading the TOML file or
//!   environment overrides.
//! - **`Configuration`**: Semantic errors in a configuration that parsed fine
//!   (zero baud rate, unknown log level, ...). Caught by `TcbConfig::validate`.
//! - **`Io`** / **`Serial`**: Raw transport faults. Inside the driver these are
//!   absorbed by the retry coordinator and turned into a reconnect.
//! - **`ConnectionFault`**: Reconnecting the transport failed. No further
//!   progress is possible, so this one is propagated.
//! - **`InvalidContext`** / **`UnitOutOfRange`**: Caller errors, rejected before
//!   anything is written to the board.
//!
//! The recoverable conditions of the protocol (a desynced response, an
//! unparseable dump, a single bad field) are *not* `TcbError` variants. They are
//! the plain error structs at the bottom of this module, which the driver logs
//! and reports through outcome values while carrying on.

use crate::tcb::entities::EntityKind;
use thiserror::Error;

/// Convenience alias for results using the driver error type.
pub type AppResult<T> = std::result::Result<T, TcbError>;

/// Errors the driver returns to callers.
#[derive(Error, Debug)]
pub enum TcbError {
    /// Configuration file or environment could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration loaded but holds invalid values
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Transport-level I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port could not be opened or configured
    #[cfg(feature = "instrument_serial")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The link failed and reconnecting did not help. Terminal for the session
    #[error("Connection to '{port}' lost and could not be re-established: {message}")]
    ConnectionFault {
        /// Transport description, e.g. the port name
        port: String,
        /// Why the reconnect failed
        message: String,
    },

    /// Operation on a transport that is not open (or a closed session)
    #[error("Serial port not connected")]
    SerialPortNotConnected,

    /// Serial I/O requested in a build without `instrument_serial`
    #[error("Serial support not enabled. Rebuild with --features instrument_serial")]
    SerialFeatureDisabled,

    /// Menu name that is not `main`, `controller` or `compensator`
    #[error("Context '{0}' is not valid (expected main, controller or compensator)")]
    InvalidContext(String),

    /// Unit number outside 1..=count for its kind
    #[error("{kind} {unit} does not exist (board has {count}, numbered from 1)")]
    UnitOutOfRange {
        /// Kind of entity addressed
        kind: EntityKind,
        /// Unit number requested
        unit: usize,
        /// Units of that kind on the board
        count: usize,
    },
}

impl From<figment::Error> for TcbError {
    fn from(value: figment::Error) -> Self {
        TcbError::Config(Box::new(value))
    }
}

impl TcbError {
    /// Whether the session can keep going after this error.
    ///
    /// Only a lost connection is terminal; everything else is a rejected call.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, TcbError::ConnectionFault { .. })
    }
}

// =============================================================================
// Recoverable protocol conditions
// =============================================================================

/// A response did not contain the substring its command promises.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Expected response '{expected}' to '{command}', got '{response}'")]
pub struct DesyncError {
    /// Token that was sent
    pub command: String,
    /// Substring the reply should have contained
    pub expected: String,
    /// Reply actually received
    pub response: String,
}

/// A telemetry dump could not be attributed to the registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// A block header is absent from the dump
    #[error("possible desync: {0} header not found in telemetry dump")]
    MissingHeader(EntityKind),

    /// Two block headers were found on the same line
    #[error("possible desync: {first} and {second} headers share one line")]
    SharedHeaderLine {
        /// Kind whose header comes first in registry order
        first: EntityKind,
        /// Kind whose header shares the line
        second: EntityKind,
    },

    /// A row names a unit the registry does not have
    #[error("no {kind} matches row token '{token}'")]
    UnknownEntity {
        /// Block the row was found in
        kind: EntityKind,
        /// Leading field of the row
        token: String,
    },
}

/// A single telemetry field was not numeric; its raw text was kept.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("field '{field}' is not numeric: '{raw}'")]
pub struct FieldConversionError {
    /// Column name
    pub field: &'static str,
    /// Text as received
    pub raw: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_fault_is_terminal() {
        let err = TcbError::ConnectionFault {
            port: "/dev/ttyUSB0".into(),
            message: "No such file or directory".into(),
        };
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("/dev/ttyUSB0"));
    }

    #[test]
    fn unit_out_of_range_is_recoverable() {
        let err = TcbError::UnitOutOfRange {
            kind: EntityKind::Compensator,
            unit: 7,
            count: 6,
        };
        assert!(err.is_recoverable());
        assert_eq!(
            err.to_string(),
            "Compensator 7 does not exist (board has 6, numbered from 1)"
        );
    }

    #[test]
    fn desync_message_names_both_sides() {
        let err = DesyncError {
            command: "t25".into(),
            expected: "Target temperature set to".into(),
            response: "Unknown command".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("t25"));
        assert!(msg.contains("Unknown command"));
    }
}
