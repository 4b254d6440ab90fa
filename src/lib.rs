//! # LFDI Tuning Control Board Driver
//!
//! Command and telemetry client for the Tuning Control Board (TCB), the
//! embedded controller that drives the heaters and liquid-crystal
//! compensators of the LFDI tunable filter. The board speaks a menu-driven
//! ASCII console over a serial line; this crate turns that into typed setters
//! and a structured mirror of the board's state.
//!
//! ## Crate Structure
//!
//! - **`hardware`**: The byte link. `Transport` trait, the `serialport`-backed
//!   `SerialTransport`, and `MockTcb`, a simulated board used by the tests and
//!   the CLI's `--mock` mode.
//! - **`tcb`**: The protocol engine, built bottom-up:
//!   - `entities`: Controllers, Compensators, GPIOs and Bipolar outputs, and
//!     the `EntityRegistry` holding them
//!   - `codec`: command tokens and the reply text that confirms them
//!   - `context`: the board's menu state machine
//!   - `retry`: verify, retry, reconnect around every send
//!   - `telemetry`: raw dump parsing into the registry
//!   - `session`: `TcbSession`, the public entry point
//! - **`config`**: `TcbConfig`, loaded with figment from TOML and `LFDI_TCB_*`
//!   environment variables.
//! - **`logging`**: `tracing-subscriber` setup.
//! - **`error`**: `TcbError` and the recoverable protocol conditions.
//!
//! ## Example
//!
//! ```no_run
//! use lfdi_tcb::{TcbConfig, TcbSession};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TcbConfig::load()?;
//! let mut tcb = TcbSession::connect(&config)?;
//!
//! tcb.set_controller_setpoint(1, 35.0)?;
//! tcb.set_controller_enable(1, true)?;
//! println!("{}", tcb.header_format());
//! println!("{}", tcb.get_info()?);
//!
//! let reached = tcb.controller(1).map_or(false, |c| c.is_within(35.0, 0.1));
//! println!("at setpoint: {}", reached);
//! # Ok(())
//! # }
//! ```

/// Layered configuration (TOML file plus environment)
pub mod config;
/// Error types
pub mod error;
/// Transports: serial port and simulated board
pub mod hardware;
/// Tracing subscriber setup
pub mod logging;
/// Board protocol: commands, menus, retries, telemetry and sessions
pub mod tcb;

pub use config::TcbConfig;
pub use error::{AppResult, TcbError};
pub use hardware::{MockTcb, SerialTransport, Transport};
pub use tcb::{
    EntityCounts, EntityRegistry, MenuContext, SendOutcome, SendStatus, SessionOptions,
    TcbSession, TelemetryStatus,
};
