//! Tuning Control Board protocol engine.

/// Command tokens and their expected replies
pub mod codec;
/// Menu tracking and navigation
pub mod context;
/// Board entities and the local registry
pub mod entities;
/// Verified sends with bounded retry and reconnect
pub mod retry;
/// High-level board session
pub mod session;
/// Telemetry dump parsing
pub mod telemetry;

pub use codec::{CompensatorCommand, ControllerCommand};
pub use context::{ContextNavigator, MenuContext};
pub use entities::{
    Bipolar, Compensator, Controller, EntityCounts, EntityKind, EntityRegistry, Gpio, Reading,
    TelemetryRow,
};
pub use retry::{RetryCoordinator, RetryPolicy, RetryStats, SendOutcome, SendStatus};
pub use session::{SessionOptions, TcbSession};
pub use telemetry::{parse_dump, TelemetryStatus};
