//! Mock Tuning Control Board
//!
//! A [`Transport`] that runs a small simulation of the board firmware instead
//! of talking to a serial port. It tracks the menu the console is in, which
//! unit is selected, and a full [`EntityRegistry`] of board-side state, and
//! answers each token with the same confirmation text the real firmware uses.
//!
//! Used by the unit and integration tests, and by the CLI's `--mock` flag.
//!
//! # Fault injection
//!
//! - [`MockTcb::never_acknowledge`]: every reply is `ERR`, nothing changes state
//! - [`MockTcb::fail_next_io`]: the next `n` I/O calls return an I/O error
//! - [`MockTcb::fail_reconnect`]: reconnect attempts fail
//! - [`MockTcb::with_dump`]: fixed reply to `r`, e.g. a truncated dump
//!
//! # Thermal model
//!
//! Each `r` moves every enabled controller's temperature halfway toward its
//! setpoint, so hold loops converge in a few polls.

use crate::error::{AppResult, TcbError};
use crate::hardware::transport::Transport;
use crate::tcb::codec::{
    parse_select, CompensatorCommand, ControllerCommand, RAW_DATA, RESET, RETURN_TO_MAIN,
};
use crate::tcb::context::MenuContext;
use crate::tcb::entities::{EntityCounts, EntityKind, EntityRegistry, Reading};
use std::io;
use tracing::trace;

const UNKNOWN_COMMAND: &str = "Unknown command\r\n";
const NOT_ACKNOWLEDGED: &str = "ERR\r\n";
const MAIN_MENU: &str = "Main Menu\r\n\
controller - controller menu\r\n\
compensator - compensator menu\r\n\
r - raw data\r\n\
bounce - reboot\r\n";

/// Simulated board behind the [`Transport`] interface.
pub struct MockTcb {
    open: bool,
    context: MenuContext,
    selected: Option<usize>,
    board: EntityRegistry,
    pending: String,
    writes: Vec<String>,
    opens: usize,
    reconnects: usize,
    acknowledge: bool,
    fail_io: u32,
    fail_reconnect: bool,
    dump_override: Option<String>,
}

impl MockTcb {
    /// Closed mock board in the main menu with all readings zeroed.
    pub fn new(counts: EntityCounts) -> Self {
        Self {
            open: false,
            context: MenuContext::Main,
            selected: None,
            board: EntityRegistry::new(counts),
            pending: String::new(),
            writes: Vec::new(),
            opens: 0,
            reconnects: 0,
            acknowledge: true,
            fail_io: 0,
            fail_reconnect: false,
            dump_override: None,
        }
    }

    /// Board that answers every command with `ERR`.
    pub fn never_acknowledge(mut self) -> Self {
        self.acknowledge = false;
        self
    }

    /// Reply to `r` with `raw` instead of the simulated state.
    pub fn with_dump(mut self, raw: impl Into<String>) -> Self {
        self.dump_override = Some(raw.into());
        self
    }

    /// Make the next `count` I/O calls fail.
    pub fn fail_next_io(mut self, count: u32) -> Self {
        self.fail_io = count;
        self
    }

    /// Make every reconnect fail.
    pub fn fail_reconnect(mut self) -> Self {
        self.fail_reconnect = true;
        self
    }

    /// Start controller `unit` at `temperature` (both instantaneous and average).
    pub fn with_controller_temperature(mut self, unit: usize, temperature: f64) -> Self {
        if let Ok(controller) = self.board.controller_mut(unit) {
            controller.temperature = Reading::Number(temperature);
            controller.average = Reading::Number(temperature);
        }
        self
    }

    /// Every command written so far, without the terminator.
    pub fn writes(&self) -> &[String] {
        &self.writes
    }

    /// Forget the recorded writes.
    pub fn clear_writes(&mut self) {
        self.writes.clear();
    }

    /// Number of reconnects requested so far.
    pub fn reconnects(&self) -> usize {
        self.reconnects
    }

    /// Number of times the link was opened, reconnects included.
    pub fn opens(&self) -> usize {
        self.opens
    }

    /// Board-side state.
    pub fn board(&self) -> &EntityRegistry {
        &self.board
    }

    /// Menu the simulated console is in.
    pub fn context(&self) -> MenuContext {
        self.context
    }

    fn check_io(&mut self) -> AppResult<()> {
        if !self.open {
            return Err(TcbError::SerialPortNotConnected);
        }
        if self.fail_io > 0 {
            self.fail_io -= 1;
            return Err(TcbError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "simulated link fault",
            )));
        }
        Ok(())
    }

    /// Run one token through the firmware and return its reply.
    fn respond(&mut self, token: &str) -> String {
        if !self.acknowledge {
            return NOT_ACKNOWLEDGED.to_string();
        }

        match token {
            RETURN_TO_MAIN => {
                self.context = MenuContext::Main;
                self.selected = None;
                return MAIN_MENU.to_string();
            }
            RESET => {
                self.context = MenuContext::Main;
                self.selected = None;
                return "Rebooting...\r\n".to_string();
            }
            _ => {}
        }

        match self.context {
            MenuContext::Main => self.respond_main(token),
            MenuContext::Controller => self.respond_controller(token),
            MenuContext::Compensator => self.respond_compensator(token),
        }
    }

    fn respond_main(&mut self, token: &str) -> String {
        if token == RAW_DATA {
            self.step_thermal_model();
            return match &self.dump_override {
                Some(raw) => raw.clone(),
                None => self.board.dump(),
            };
        }
        match token.parse::<MenuContext>() {
            Ok(MenuContext::Controller) => {
                self.context = MenuContext::Controller;
                self.selected = None;
                "Controller Menu\r\n".to_string()
            }
            Ok(MenuContext::Compensator) => {
                self.context = MenuContext::Compensator;
                self.selected = None;
                "Compensator Menu\r\n".to_string()
            }
            _ => UNKNOWN_COMMAND.to_string(),
        }
    }

    fn respond_controller(&mut self, token: &str) -> String {
        if let Some(unit) = parse_select(token) {
            return self.select(EntityKind::Controller, unit);
        }
        let (Some(unit), Some(command)) = (self.selected, ControllerCommand::decode(token)) else {
            return UNKNOWN_COMMAND.to_string();
        };
        let Ok(controller) = self.board.controller_mut(unit) else {
            return UNKNOWN_COMMAND.to_string();
        };
        command.apply(controller);
        match command {
            ControllerCommand::Enable(_) => {
                format!("Controller {}: {}\r\n", unit, command.expected_response())
            }
            _ => format!(
                "Controller {}: {} {}\r\n",
                unit,
                command.expected_response(),
                &token[1..]
            ),
        }
    }

    fn respond_compensator(&mut self, token: &str) -> String {
        if let Some(unit) = parse_select(token) {
            return self.select(EntityKind::Compensator, unit);
        }
        let (Some(unit), Some(command)) = (self.selected, CompensatorCommand::decode(token))
        else {
            return UNKNOWN_COMMAND.to_string();
        };
        let Ok(compensator) = self.board.compensator_mut(unit) else {
            return UNKNOWN_COMMAND.to_string();
        };
        command.apply(compensator);
        let expected = command.expected_response(unit);
        match command {
            CompensatorCommand::Voltage(v) => format!("Compensator {}{} {}\r\n", unit, expected, v),
            CompensatorCommand::Wavelength(v) => format!("{} to {}\r\n", expected, v),
            CompensatorCommand::SensorAddress(v) => format!("{} to {}\r\n", expected, v),
            _ => format!("{}\r\n", expected),
        }
    }

    fn select(&mut self, kind: EntityKind, unit: usize) -> String {
        if self.board.check_unit(kind, unit).is_err() {
            return format!("Invalid {} number\r\n", kind);
        }
        self.selected = Some(unit);
        format!("{} {} selected\r\n", kind, unit)
    }

    fn step_thermal_model(&mut self) {
        for controller in self.board.controllers.iter_mut().filter(|c| c.enabled) {
            let (Some(temp), Some(target)) =
                (controller.temperature.as_f64(), controller.setpoint.as_f64())
            else {
                continue;
            };
            let next = temp + (target - temp) * 0.5;
            controller.effort = Reading::Number(((target - temp) * 10.0).clamp(0.0, 100.0));
            controller.temperature = Reading::Number(next);
            controller.average = Reading::Number(next);
        }
    }
}

impl Default for MockTcb {
    fn default() -> Self {
        Self::new(EntityCounts::default())
    }
}

impl Transport for MockTcb {
    fn open(&mut self) -> AppResult<()> {
        self.open = true;
        self.opens += 1;
        self.pending.clear();
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
        self.pending.clear();
    }

    fn reconnect(&mut self) -> AppResult<()> {
        self.reconnects += 1;
        self.close();
        if self.fail_reconnect {
            return Err(TcbError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                "simulated port disappeared",
            )));
        }
        self.open()
    }

    fn clear_buffers(&mut self) -> AppResult<()> {
        self.check_io()?;
        self.pending.clear();
        Ok(())
    }

    fn write_line(&mut self, line: &str) -> AppResult<()> {
        self.check_io()?;
        self.writes.push(line.to_string());
        let reply = self.respond(line.trim());
        trace!(command = line, reply = %reply.escape_default(), "Mock board replied");
        self.pending.push_str(&reply);
        Ok(())
    }

    fn read_all(&mut self) -> AppResult<String> {
        self.check_io()?;
        Ok(std::mem::take(&mut self.pending))
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn describe(&self) -> String {
        "mock TCB".to_string()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange(board: &mut MockTcb, token: &str) -> String {
        board.write_line(token).unwrap();
        board.read_all().unwrap()
    }

    fn open_board() -> MockTcb {
        let mut board = MockTcb::default();
        board.open().unwrap();
        board
    }

    #[test]
    fn test_io_requires_open() {
        let mut board = MockTcb::default();
        assert!(matches!(
            board.write_line("m"),
            Err(TcbError::SerialPortNotConnected)
        ));
        board.open().unwrap();
        assert!(board.is_open());
    }

    #[test]
    fn test_menu_navigation() {
        let mut board = open_board();
        assert!(exchange(&mut board, "controller").contains("Controller Menu"));
        assert_eq!(board.context(), MenuContext::Controller);

        // No direct hop between sub-menus.
        assert_eq!(exchange(&mut board, "compensator"), UNKNOWN_COMMAND);
        assert_eq!(board.context(), MenuContext::Controller);

        exchange(&mut board, "m");
        assert_eq!(board.context(), MenuContext::Main);
    }

    #[test]
    fn test_controller_setpoint_is_confirmed_and_stored() {
        let mut board = open_board();
        exchange(&mut board, "controller");
        assert!(exchange(&mut board, "c2").contains("selected"));
        let reply = exchange(&mut board, "t25");
        assert!(reply.contains("Target temperature set to"));
        assert_eq!(
            board.board().controller(2).unwrap().setpoint,
            Reading::Number(25.0)
        );
    }

    #[test]
    fn test_commands_need_a_selected_unit() {
        let mut board = open_board();
        exchange(&mut board, "controller");
        assert_eq!(exchange(&mut board, "t25"), UNKNOWN_COMMAND);
        assert!(exchange(&mut board, "c9").contains("Invalid"));
    }

    #[test]
    fn test_compensator_replies_name_the_unit() {
        let mut board = open_board();
        exchange(&mut board, "compensator");
        exchange(&mut board, "c3");
        assert!(exchange(&mut board, "e").contains("Compensator 3 Enabled."));
        assert!(exchange(&mut board, "v2.5").contains(" Voltage Set to"));
        assert!(exchange(&mut board, "comp").contains("Compensator 3 Auto Compensating"));
        assert!(board.board().compensator(3).unwrap().auto);
        assert!(exchange(&mut board, "d").contains("Compensator 3 Disabled."));
    }

    #[test]
    fn test_raw_data_only_in_main_menu() {
        let mut board = open_board();
        assert!(exchange(&mut board, "r").contains("GPIO\tEnabled"));
        exchange(&mut board, "controller");
        assert_eq!(exchange(&mut board, "r"), UNKNOWN_COMMAND);
    }

    #[test]
    fn test_thermal_model_approaches_setpoint() {
        let mut board = MockTcb::default().with_controller_temperature(1, 20.0);
        board.open().unwrap();
        exchange(&mut board, "controller");
        exchange(&mut board, "c1");
        exchange(&mut board, "t30");
        exchange(&mut board, "e");
        exchange(&mut board, "m");
        exchange(&mut board, "r");
        assert_eq!(
            board.board().controller(1).unwrap().temperature,
            Reading::Number(25.0)
        );
    }

    #[test]
    fn test_fault_injection() {
        let mut board = MockTcb::default().fail_next_io(2).fail_reconnect();
        board.open().unwrap();
        assert!(board.clear_buffers().is_err());
        assert!(board.write_line("m").is_err());
        assert!(board.clear_buffers().is_ok());
        assert!(board.reconnect().is_err());
        assert!(!board.is_open());
        assert_eq!(board.reconnects(), 1);
    }

    #[test]
    fn test_never_acknowledge_changes_nothing() {
        let mut board = MockTcb::default().never_acknowledge();
        board.open().unwrap();
        assert_eq!(exchange(&mut board, "controller"), NOT_ACKNOWLEDGED);
        assert_eq!(board.context(), MenuContext::Main);
        assert_eq!(board.writes(), ["controller".to_string()]);
    }
}
