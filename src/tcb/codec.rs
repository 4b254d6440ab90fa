//! Command Codec
//!
//! Formats the short ASCII tokens the board's menus accept and names the
//! substring a correct reply must contain. Tokens are a letter code plus an
//! optional argument (`t25`, `v3.5`, `e`). Nothing here touches the transport.
//!
//! Some tokens overlap on purpose: in the controller menu `d` disables the loop
//! while `d<value>` sets the derivative gain. The board tells them apart by the
//! argument.

use crate::tcb::entities::{Compensator, Controller, Reading};

/// Return to the main menu.
pub const RETURN_TO_MAIN: &str = "m";
/// Request the raw telemetry dump (main menu only).
pub const RAW_DATA: &str = "r";
/// Reboot the board.
pub const RESET: &str = "bounce";

/// Token that selects unit `unit` inside the current menu.
pub fn select_unit(unit: usize) -> String {
    format!("c{}", unit)
}

/// A settable Controller field together with its new value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControllerCommand {
    /// Proportional gain
    Kp(f64),
    /// Integral gain
    Ki(f64),
    /// Derivative gain
    Kd(f64),
    /// Target temperature in °C
    Setpoint(f64),
    /// Switch the unit on or off
    Enable(bool),
    /// I2C address of the temperature sensor
    SensorAddress(u8),
    /// Rolling-average window length
    History(u32),
    /// Control loop frequency
    Frequency(u32),
}

impl ControllerCommand {
    /// Token written to the board.
    pub fn token(&self) -> String {
        match self {
            ControllerCommand::Kp(v) => format!("p{}", v),
            ControllerCommand::Ki(v) => format!("i{}", v),
            ControllerCommand::Kd(v) => format!("d{}", v),
            ControllerCommand::Setpoint(v) => format!("t{}", v),
            ControllerCommand::Enable(true) => "e".to_string(),
            ControllerCommand::Enable(false) => "d".to_string(),
            ControllerCommand::SensorAddress(v) => format!("a{}", v),
            ControllerCommand::History(v) => format!("h{}", v),
            ControllerCommand::Frequency(v) => format!("f{}", v),
        }
    }

    /// Substring that must appear in the reply.
    pub fn expected_response(&self) -> &'static str {
        match self {
            ControllerCommand::Kp(_) => "kp set to",
            ControllerCommand::Ki(_) => "ki set to",
            ControllerCommand::Kd(_) => "kd set to",
            ControllerCommand::Setpoint(_) => "Target temperature set to",
            ControllerCommand::Enable(true) => "Controller enabled.",
            ControllerCommand::Enable(false) => "Controller disabled.",
            ControllerCommand::SensorAddress(_) => "Sensor Address Set to",
            ControllerCommand::History(_) => "History set to",
            ControllerCommand::Frequency(_) => "Frequency set to",
        }
    }

    /// Parse a token as the controller menu would. `d` alone disables the
    /// loop; `d` with an argument sets the derivative gain.
    pub fn decode(token: &str) -> Option<Self> {
        let token = token.trim();
        match token {
            "e" => return Some(ControllerCommand::Enable(true)),
            "d" => return Some(ControllerCommand::Enable(false)),
            _ => {}
        }
        let (code, arg) = split_token(token)?;
        match code {
            'p' => arg.parse().ok().map(ControllerCommand::Kp),
            'i' => arg.parse().ok().map(ControllerCommand::Ki),
            'd' => arg.parse().ok().map(ControllerCommand::Kd),
            't' => arg.parse().ok().map(ControllerCommand::Setpoint),
            'a' => arg.parse().ok().map(ControllerCommand::SensorAddress),
            'h' => arg.parse().ok().map(ControllerCommand::History),
            'f' => arg.parse().ok().map(ControllerCommand::Frequency),
            _ => None,
        }
    }

    /// Echo the value into the local mirror once the board confirmed it.
    pub fn apply(&self, controller: &mut Controller) {
        match *self {
            ControllerCommand::Kp(v) => controller.kp = Reading::Number(v),
            ControllerCommand::Ki(v) => controller.ki = Reading::Number(v),
            ControllerCommand::Kd(v) => controller.kd = Reading::Number(v),
            ControllerCommand::Setpoint(v) => controller.setpoint = Reading::Number(v),
            ControllerCommand::Enable(v) => controller.enabled = v,
            ControllerCommand::SensorAddress(v) => {
                controller.sensor_address = Reading::Number(f64::from(v))
            }
            ControllerCommand::History(v) => controller.history = Reading::Number(f64::from(v)),
            ControllerCommand::Frequency(v) => {
                controller.frequency = Reading::Number(f64::from(v))
            }
        }
    }
}

/// A settable Compensator field together with its new value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CompensatorCommand {
    /// Peak-to-peak drive voltage.
    Voltage(f64),
    /// Tuning wavelength in nm
    Wavelength(f64),
    /// Flip auto-compensation on or off.
    ToggleAuto,
    /// Switch the unit on or off
    Enable(bool),
    /// I2C address of the temperature sensor
    SensorAddress(u8),
}

impl CompensatorCommand {
    /// Token written to the board.
    pub fn token(&self) -> String {
        match self {
            CompensatorCommand::Voltage(v) => format!("v{}", v),
            CompensatorCommand::Wavelength(v) => format!("w{}", v),
            CompensatorCommand::ToggleAuto => "comp".to_string(),
            CompensatorCommand::Enable(true) => "e".to_string(),
            CompensatorCommand::Enable(false) => "d".to_string(),
            CompensatorCommand::SensorAddress(v) => format!("a{}", v),
        }
    }

    /// Substring that must appear in the reply. Some replies name the unit.
    pub fn expected_response(&self, unit: usize) -> String {
        match self {
            CompensatorCommand::Voltage(_) => " Voltage Set to".to_string(),
            CompensatorCommand::Wavelength(_) => "Wavelength Set".to_string(),
            CompensatorCommand::ToggleAuto => format!("Compensator {} Auto Compensating", unit),
            CompensatorCommand::Enable(true) => format!("Compensator {} Enabled.", unit),
            CompensatorCommand::Enable(false) => format!("Compensator {} Disabled.", unit),
            CompensatorCommand::SensorAddress(_) => "Sensor Address Set".to_string(),
        }
    }

    /// Parse a token as the compensator menu would.
    pub fn decode(token: &str) -> Option<Self> {
        let token = token.trim();
        match token {
            "comp" => return Some(CompensatorCommand::ToggleAuto),
            "e" => return Some(CompensatorCommand::Enable(true)),
            "d" => return Some(CompensatorCommand::Enable(false)),
            _ => {}
        }
        let (code, arg) = split_token(token)?;
        match code {
            'v' => arg.parse().ok().map(CompensatorCommand::Voltage),
            'w' => arg.parse().ok().map(CompensatorCommand::Wavelength),
            'a' => arg.parse().ok().map(CompensatorCommand::SensorAddress),
            _ => None,
        }
    }

    /// Echo the value into the local mirror once the board confirmed it.
    pub fn apply(&self, compensator: &mut Compensator) {
        match *self {
            CompensatorCommand::Voltage(v) => compensator.voltage = Reading::Number(v),
            CompensatorCommand::Wavelength(v) => compensator.wavelength = Reading::Number(v),
            CompensatorCommand::ToggleAuto => compensator.auto = !compensator.auto,
            CompensatorCommand::Enable(v) => compensator.enabled = v,
            CompensatorCommand::SensorAddress(v) => {
                compensator.sensor_address = Reading::Number(f64::from(v))
            }
        }
    }
}

/// Split `t25` into `('t', "25")`. Tokens without an argument yield `None`.
fn split_token(token: &str) -> Option<(char, &str)> {
    let mut chars = token.chars();
    let code = chars.next()?;
    let arg = chars.as_str();
    if arg.is_empty() {
        return None;
    }
    Some((code, arg))
}

/// Parse a unit-select token (`c3`) back into its unit number.
pub fn parse_select(token: &str) -> Option<usize> {
    token.trim().strip_prefix('c')?.parse().ok()
}
