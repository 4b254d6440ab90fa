//! TCB Session
//!
//! The driver's public face. A session exclusively owns the transport (through
//! the retry coordinator), the menu navigator and the entity registry. Every
//! setter is the same composition:
//!
//! ```text
//! enter menu -> select unit (c<N>) -> send token, verify reply -> return to main
//! ```
//!
//! and only a verified reply is echoed into the registry. Telemetry refreshes
//! always start from `main`.
//!
//! Dropping a session de-energizes the board: every Controller and then every
//! Compensator is disabled before the transport is closed. Call
//! [`TcbSession::close`] directly to observe errors from that sequence.

use crate::config::TcbConfig;
use crate::error::{AppResult, TcbError};
use crate::hardware::transport::{SerialTransport, Transport};
use crate::tcb::codec::{self, CompensatorCommand, ControllerCommand};
use crate::tcb::context::{ContextNavigator, MenuContext};
use crate::tcb::entities::{Compensator, Controller, EntityCounts, EntityKind, EntityRegistry};
use crate::tcb::retry::{RetryCoordinator, RetryPolicy, RetryStats, SendOutcome};
use crate::tcb::telemetry::{parse_dump, TelemetryStatus};
use chrono::{Local, NaiveDateTime};
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Date and time columns at the front of every snapshot line.
const SNAPSHOT_TIMESTAMP: &str = "%m/%d/%Y\t%H:%M:%S";

/// Construction-time parameters of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    /// Number of each entity on the board
    pub counts: EntityCounts,
    /// Retry bound and settle interval for every command
    pub retry: RetryPolicy,
    /// Wait after `bounce` before the board accepts commands again.
    pub reset_settle: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            counts: EntityCounts::default(),
            retry: RetryPolicy::default(),
            reset_settle: Duration::from_secs(10),
        }
    }
}

impl SessionOptions {
    /// Options from the `[entities]` and `[protocol]` sections.
    pub fn from_config(config: &TcbConfig) -> Self {
        Self {
            counts: config.entities,
            retry: RetryPolicy {
                max_retries: config.protocol.max_retries,
                settle_interval: config.protocol.settle_interval,
            },
            reset_settle: config.protocol.reset_settle,
        }
    }
}

/// A live connection to one Tuning Control Board.
pub struct TcbSession<T: Transport> {
    link: RetryCoordinator<T>,
    navigator: ContextNavigator,
    registry: EntityRegistry,
    header_format: String,
    reset_settle: Duration,
    closed: bool,
}

impl TcbSession<SerialTransport> {
    /// Open the serial port named in `config` and start a session on it.
    pub fn connect(config: &TcbConfig) -> AppResult<Self> {
        Self::open(
            SerialTransport::from_config(&config.serial),
            SessionOptions::from_config(config),
        )
    }
}

impl<T: Transport> TcbSession<T> {
    /// Start a session on `transport`, opening it if needed.
    ///
    /// The board is assumed to be at its main menu, as it is after power-up.
    pub fn open(mut transport: T, options: SessionOptions) -> AppResult<Self> {
        if !transport.is_open() {
            transport.open()?;
        }
        info!(transport = %transport.describe(), "TCB session opened");

        let registry = EntityRegistry::new(options.counts);
        let header_format = registry.header_format();
        Ok(Self {
            link: RetryCoordinator::new(transport, options.retry),
            navigator: ContextNavigator::new(),
            registry,
            header_format,
            reset_settle: options.reset_settle,
            closed: false,
        })
    }

    // =========================================================================
    // Read access
    // =========================================================================

    /// Local mirror of the board, as of the last refresh or confirmed command.
    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    /// Controller by 1-based unit number.
    pub fn controller(&self, unit: usize) -> Option<&Controller> {
        self.registry.controller(unit)
    }

    /// Compensator by 1-based unit number.
    pub fn compensator(&self, unit: usize) -> Option<&Compensator> {
        self.registry.compensator(unit)
    }

    /// Menu the driver believes the board is in.
    pub fn context(&self) -> MenuContext {
        self.navigator.current()
    }

    /// TSV header matching the lines returned by [`get_info`](Self::get_info).
    pub fn header_format(&self) -> &str {
        &self.header_format
    }

    /// Underlying transport.
    pub fn transport(&self) -> &T {
        self.link.transport()
    }

    /// Underlying transport, mutably.
    pub fn transport_mut(&mut self) -> &mut T {
        self.link.transport_mut()
    }

    /// Retry and reconnect totals for this session.
    pub fn retry_stats(&self) -> RetryStats {
        self.link.stats()
    }

    /// Whether [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    // =========================================================================
    // Raw protocol access
    // =========================================================================

    /// Send a raw token in whatever menu the board is in.
    ///
    /// Menu tokens (`controller`, `compensator`, `m`, `bounce`) sent this way
    /// are tracked, so later commands and teardown navigate from the right menu.
    pub fn send(&mut self, command: &str, expected: Option<&str>) -> AppResult<SendOutcome> {
        self.ensure_open()?;
        let outcome = self.link.send(command, expected)?;
        self.navigator.observe(command);
        Ok(outcome)
    }

    /// Walk the board to `target` through `main`.
    pub fn change_context(&mut self, target: MenuContext) -> AppResult<()> {
        self.ensure_open()?;
        self.navigator.change(target, &mut self.link)
    }

    /// Change context by name. Unknown names are rejected before any write.
    pub fn change_context_named(&mut self, name: &str) -> AppResult<()> {
        let target: MenuContext = name.parse()?;
        self.change_context(target)
    }

    // =========================================================================
    // Setters
    // =========================================================================

    /// Apply one controller command to unit `unit` (1-based).
    #[instrument(level = "debug", skip(self))]
    pub fn set_controller(
        &mut self,
        unit: usize,
        command: ControllerCommand,
    ) -> AppResult<SendOutcome> {
        self.ensure_open()?;
        self.registry.check_unit(EntityKind::Controller, unit)?;

        let outcome = self.send_in_menu(
            MenuContext::Controller,
            unit,
            &command.token(),
            command.expected_response(),
        )?;

        if outcome.is_verified() {
            command.apply(self.registry.controller_mut(unit)?);
        } else {
            warn!(unit, ?command, "Controller command unconfirmed; state unknown until next refresh");
        }
        Ok(outcome)
    }

    /// Apply one compensator command to unit `unit` (1-based).
    ///
    /// Disabling first drives the channel to zero volts.
    #[instrument(level = "debug", skip(self))]
    pub fn set_compensator(
        &mut self,
        unit: usize,
        command: CompensatorCommand,
    ) -> AppResult<SendOutcome> {
        self.ensure_open()?;
        self.registry.check_unit(EntityKind::Compensator, unit)?;

        if command == CompensatorCommand::Enable(false) {
            self.set_compensator(unit, CompensatorCommand::Voltage(0.0))?;
        }

        let expected = command.expected_response(unit);
        let outcome =
            self.send_in_menu(MenuContext::Compensator, unit, &command.token(), &expected)?;

        if outcome.is_verified() {
            command.apply(self.registry.compensator_mut(unit)?);
        } else {
            warn!(unit, ?command, "Compensator command unconfirmed; state unknown until next refresh");
        }
        Ok(outcome)
    }

    /// Set a Controller's proportional gain.
    pub fn set_controller_kp(&mut self, unit: usize, kp: f64) -> AppResult<SendOutcome> {
        self.set_controller(unit, ControllerCommand::Kp(kp))
    }

    /// Set a Controller's integral gain.
    pub fn set_controller_ki(&mut self, unit: usize, ki: f64) -> AppResult<SendOutcome> {
        self.set_controller(unit, ControllerCommand::Ki(ki))
    }

    /// Set a Controller's derivative gain.
    pub fn set_controller_kd(&mut self, unit: usize, kd: f64) -> AppResult<SendOutcome> {
        self.set_controller(unit, ControllerCommand::Kd(kd))
    }

    /// Set a Controller's target temperature in °C.
    pub fn set_controller_setpoint(&mut self, unit: usize, setpoint: f64) -> AppResult<SendOutcome> {
        self.set_controller(unit, ControllerCommand::Setpoint(setpoint))
    }

    /// Switch a Controller on or off.
    pub fn set_controller_enable(&mut self, unit: usize, enable: bool) -> AppResult<SendOutcome> {
        self.set_controller(unit, ControllerCommand::Enable(enable))
    }

    /// Set the I2C address of a Controller's sensor.
    pub fn set_controller_sensor_address(
        &mut self,
        unit: usize,
        address: u8,
    ) -> AppResult<SendOutcome> {
        self.set_controller(unit, ControllerCommand::SensorAddress(address))
    }

    /// Set a Controller's rolling-average window.
    pub fn set_controller_history(&mut self, unit: usize, history: u32) -> AppResult<SendOutcome> {
        self.set_controller(unit, ControllerCommand::History(history))
    }

    /// Set a Controller's loop frequency.
    pub fn set_controller_frequency(
        &mut self,
        unit: usize,
        frequency: u32,
    ) -> AppResult<SendOutcome> {
        self.set_controller(unit, ControllerCommand::Frequency(frequency))
    }

    /// Set a Compensator's peak-to-peak voltage.
    pub fn set_compensator_voltage(&mut self, unit: usize, voltage: f64) -> AppResult<SendOutcome> {
        self.set_compensator(unit, CompensatorCommand::Voltage(voltage))
    }

    /// Set a Compensator's tuning wavelength in nm.
    pub fn set_compensator_wavelength(
        &mut self,
        unit: usize,
        wavelength: f64,
    ) -> AppResult<SendOutcome> {
        self.set_compensator(unit, CompensatorCommand::Wavelength(wavelength))
    }

    /// Switch a Compensator on or off. Disabling zeroes the voltage first.
    pub fn set_compensator_enable(&mut self, unit: usize, enable: bool) -> AppResult<SendOutcome> {
        self.set_compensator(unit, CompensatorCommand::Enable(enable))
    }

    /// Set the I2C address of a Compensator's sensor.
    pub fn set_compensator_sensor_address(
        &mut self,
        unit: usize,
        address: u8,
    ) -> AppResult<SendOutcome> {
        self.set_compensator(unit, CompensatorCommand::SensorAddress(address))
    }

    /// Flip a Compensator's auto-compensation.
    pub fn toggle_compensator_auto(&mut self, unit: usize) -> AppResult<SendOutcome> {
        self.set_compensator(unit, CompensatorCommand::ToggleAuto)
    }

    // =========================================================================
    // Telemetry and board control
    // =========================================================================

    /// Reboot the board and wait for it to come back.
    pub fn reset(&mut self) -> AppResult<SendOutcome> {
        self.ensure_open()?;
        info!(settle = ?self.reset_settle, "Resetting board");
        let outcome = self.link.send(codec::RESET, None)?;
        if !self.reset_settle.is_zero() {
            std::thread::sleep(self.reset_settle);
        }
        self.navigator.assume_main();
        Ok(outcome)
    }

    /// The unparsed telemetry dump.
    pub fn read_raw_data(&mut self) -> AppResult<String> {
        self.change_context(MenuContext::Main)?;
        Ok(self.link.send(codec::RAW_DATA, None)?.response)
    }

    /// Pull a dump and apply it to the registry.
    ///
    /// On [`TelemetryStatus::Desync`] the registry still holds the previous poll.
    pub fn refresh(&mut self) -> AppResult<TelemetryStatus> {
        let raw = self.read_raw_data()?;
        let status = parse_dump(&raw, &mut self.registry);
        debug!(complete = status.is_complete(), "Telemetry refreshed");
        Ok(status)
    }

    /// Refresh telemetry and return one timestamped TSV line of every entity.
    pub fn get_info(&mut self) -> AppResult<String> {
        self.refresh()?;
        Ok(self.snapshot_at(&Local::now().naive_local()))
    }

    /// Snapshot line of the current registry, stamped with `at`.
    pub fn snapshot_at(&self, at: &NaiveDateTime) -> String {
        format!("{}\t{}", at.format(SNAPSHOT_TIMESTAMP), self.registry.rows())
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Disable every Controller, then every Compensator, then close the link.
    ///
    /// Safe to call more than once. The first error is returned after the
    /// transport has been closed.
    pub fn close(&mut self) -> AppResult<()> {
        if self.closed {
            return Ok(());
        }
        info!("Closing TCB session, disabling all controllers and compensators");

        let mut first_error = None;
        let controllers = self.registry.count(EntityKind::Controller);
        let compensators = self.registry.count(EntityKind::Compensator);

        let units = (1..=controllers)
            .map(|unit| (EntityKind::Controller, unit))
            .chain((1..=compensators).map(|unit| (EntityKind::Compensator, unit)));
        for (kind, unit) in units {
            let result = match kind {
                EntityKind::Controller => self.set_controller_enable(unit, false),
                _ => self.set_compensator_enable(unit, false),
            };
            if let Err(err) = result {
                error!(%kind, unit, error = %err, "Failed to disable during teardown");
                let fatal = !err.is_recoverable();
                first_error.get_or_insert(err);
                if fatal {
                    break;
                }
            }
        }

        self.closed = true;
        self.link.close();
        info!("TCB session closed");
        first_error.map_or(Ok(()), Err)
    }

    fn ensure_open(&self) -> AppResult<()> {
        if self.closed {
            return Err(TcbError::SerialPortNotConnected);
        }
        Ok(())
    }

    /// Enter `menu`, select `unit`, send `token`, and go back to `main`.
    fn send_in_menu(
        &mut self,
        menu: MenuContext,
        unit: usize,
        token: &str,
        expected: &str,
    ) -> AppResult<SendOutcome> {
        self.navigator.change(menu, &mut self.link)?;
        self.link.send(&codec::select_unit(unit), None)?;
        let outcome = self.link.send(token, Some(expected))?;
        self.navigator.change(MenuContext::Main, &mut self.link)?;
        Ok(outcome)
    }
}

impl<T: Transport> Drop for TcbSession<T> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            error!(error = %err, "TCB session teardown incomplete");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::MockTcb;
    use crate::tcb::entities::Reading;
    use chrono::NaiveDate;

    fn options() -> SessionOptions {
        SessionOptions {
            counts: EntityCounts::default(),
            retry: RetryPolicy {
                max_retries: 3,
                settle_interval: Duration::ZERO,
            },
            reset_settle: Duration::ZERO,
        }
    }

    fn session() -> TcbSession<MockTcb> {
        TcbSession::open(MockTcb::default(), options()).unwrap()
    }

    #[test]
    fn test_open_opens_transport() {
        let session = session();
        assert!(session.transport().is_open());
        assert_eq!(session.context(), MenuContext::Main);
        assert!(session.header_format().starts_with("Date\tTime\tCont\t"));
    }

    #[test]
    fn test_setter_echoes_on_verified_reply() {
        let mut session = session();
        let outcome = session.set_controller_kp(2, 1.5).unwrap();
        assert!(outcome.is_verified());
        assert_eq!(session.controller(2).unwrap().kp, Reading::Number(1.5));
        assert_eq!(session.context(), MenuContext::Main);
        assert_eq!(session.transport().context(), MenuContext::Main);
    }

    #[test]
    fn test_unconfirmed_setter_leaves_registry_alone() {
        let mut session =
            TcbSession::open(MockTcb::default().never_acknowledge(), options()).unwrap();
        let outcome = session.set_controller_setpoint(1, 30.0).unwrap();
        assert!(!outcome.is_verified());
        assert_eq!(
            session.controller(1).unwrap().setpoint,
            Reading::Number(0.0)
        );
    }

    #[test]
    fn test_toggle_auto_flips_flag() {
        let mut session = session();
        session.toggle_compensator_auto(4).unwrap();
        assert!(session.compensator(4).unwrap().auto);
        session.toggle_compensator_auto(4).unwrap();
        assert!(!session.compensator(4).unwrap().auto);
    }

    #[test]
    fn test_snapshot_line_format() {
        let session = session();
        let at = NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_opt(14, 7, 9)
            .unwrap();
        let line = session.snapshot_at(&at);
        assert!(line.starts_with("03/05/2024\t14:07:09\tCont1\t"));
        assert!(line.ends_with("Bipolar2\t0\t0\t0\tfalse\t"));
    }

    #[test]
    fn test_reset_returns_to_main() {
        let mut session = session();
        session.change_context(MenuContext::Compensator).unwrap();
        session.reset().unwrap();
        assert_eq!(session.context(), MenuContext::Main);
        assert_eq!(session.transport().writes().last().unwrap(), "bounce");
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut session = session();
        session.close().unwrap();
        let writes = session.transport().writes().len();
        assert!(!session.transport().is_open());

        session.close().unwrap();
        assert_eq!(session.transport().writes().len(), writes);
        assert!(matches!(
            session.set_controller_enable(1, true),
            Err(TcbError::SerialPortNotConnected)
        ));
    }

    #[test]
    fn test_invalid_context_name_writes_nothing() {
        let mut session = session();
        assert!(matches!(
            session.change_context_named("gpio"),
            Err(TcbError::InvalidContext(_))
        ));
        assert!(session.transport().writes().is_empty());
    }
}
