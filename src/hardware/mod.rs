//! Hardware Links
//!
//! Byte-level access to the board. Everything above this module talks to a
//! [`Transport`]; the serial implementation needs the `instrument_serial`
//! feature, the mock is always built.

/// Simulated board for tests and `--mock`
pub mod mock;
/// Serial link and the `Transport` seam
pub mod transport;

pub use mock::MockTcb;
pub use transport::{SerialTransport, Transport, COMMAND_TERMINATOR};
