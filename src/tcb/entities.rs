//! Entity Registry
//!
//! Typed mirror of the board state: Controllers (PID temperature loops),
//! Compensators (liquid-crystal drive channels), GPIOs and Bipolar outputs.
//!
//! Every kind implements [`TelemetryRow`], which is what lets the telemetry
//! parser walk all four blocks with one generic routine. A row is the
//! tab-separated line the board prints in its raw dump, and the same column
//! layout is used for the snapshot string handed to callers, so the header
//! from [`EntityRegistry::header_format`] and the rows line up as TSV.
//!
//! The registry is created once per session with all readings zeroed and the
//! entity counts fixed. Outside the crate it is read-only; the session mutates
//! it from parsed telemetry or from the local echo of a verified command.

use crate::error::{AppResult, FieldConversionError, TcbError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Telemetry column header for Controllers.
pub const CONTROLLER_HEADER: &str =
    "Cont\tkp\tkd\tki\tep\ted\tei\teffort\ttemp\taverage\ttarget\ti2c\thist\tfreq\tenabled\tsensor";
/// Telemetry column header for Compensators.
pub const COMPENSATOR_HEADER: &str =
    "Comp\tPeak2Peak\tWave\tTemp\tAvg\tAuto\tUseAverage\ti2c\tenabled\tsensor";
/// Telemetry column header for GPIOs.
pub const GPIO_HEADER: &str = "GPIO\tEnabled";
/// Telemetry column header for Bipolar outputs.
pub const BIPOLAR_HEADER: &str = "Bipolar\tfrequency\tpulses\tPeak2Peak\tEnabled";

/// The four kinds of entity the board reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// PID temperature loop
    Controller,
    /// Liquid-crystal driver channel
    Compensator,
    /// General-purpose output
    Gpio,
    /// Bipolar pulse output
    Bipolar,
}

impl EntityKind {
    /// All kinds, in registry (and snapshot) order.
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Controller,
        EntityKind::Compensator,
        EntityKind::Gpio,
        EntityKind::Bipolar,
    ];

    /// Column header the board prints above this kind's block.
    pub fn header(self) -> &'static str {
        match self {
            EntityKind::Controller => CONTROLLER_HEADER,
            EntityKind::Compensator => COMPENSATOR_HEADER,
            EntityKind::Gpio => GPIO_HEADER,
            EntityKind::Bipolar => BIPOLAR_HEADER,
        }
    }

    /// Name the board prefixes to each instance's number ("Cont1", "GPIO3").
    pub fn row_prefix(self) -> &'static str {
        match self {
            EntityKind::Controller => "Cont",
            EntityKind::Compensator => "Comp",
            EntityKind::Gpio => "GPIO",
            EntityKind::Bipolar => "Bipolar",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EntityKind::Controller => "Controller",
            EntityKind::Compensator => "Compensator",
            EntityKind::Gpio => "GPIO",
            EntityKind::Bipolar => "Bipolar",
        };
        write!(f, "{}", label)
    }
}

// =============================================================================
// Readings
// =============================================================================

/// A numeric telemetry value, or the raw text when the board sent something
/// that is not a number (e.g. a placeholder setpoint on an idle loop).
#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    /// Parsed numeric value
    Number(f64),
    /// Field text that did not parse as a number
    Raw(String),
}

impl Reading {
    /// Numeric value, if the field parsed.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Reading::Number(v) => Some(*v),
            Reading::Raw(_) => None,
        }
    }
}

impl Default for Reading {
    fn default() -> Self {
        Reading::Number(0.0)
    }
}

impl From<f64> for Reading {
    fn from(value: f64) -> Self {
        Reading::Number(value)
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reading::Number(v) => write!(f, "{}", v),
            Reading::Raw(s) => write!(f, "{}", s),
        }
    }
}

/// One tab-split telemetry line, with per-field conversion that never aborts.
///
/// Each accessor returns `None` when the column is absent, so a short line
/// leaves the remaining fields at their previous values.
pub struct RowFields<'a> {
    fields: Vec<&'a str>,
    errors: Vec<FieldConversionError>,
}

impl<'a> RowFields<'a> {
    /// Split a raw line on tabs.
    pub fn new(line: &'a str) -> Self {
        Self {
            fields: line.split('\t').map(|f| f.trim()).collect(),
            errors: Vec::new(),
        }
    }

    /// Leading token, e.g. `Cont2`.
    pub fn token(&self) -> &'a str {
        self.fields.first().copied().unwrap_or("")
    }

    /// Number of columns on the line.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True for a blank line.
    pub fn is_empty(&self) -> bool {
        self.fields.iter().all(|f| f.is_empty())
    }

    /// Numeric column; falls back to the raw text.
    pub fn reading(&mut self, index: usize, field: &'static str) -> Option<Reading> {
        self.reading_with_unit(index, field, "")
    }

    /// Numeric column carrying a unit suffix such as the `C` on temperatures.
    pub fn reading_with_unit(
        &mut self,
        index: usize,
        field: &'static str,
        unit: &str,
    ) -> Option<Reading> {
        let raw = *self.fields.get(index)?;
        let number = if unit.is_empty() {
            raw
        } else {
            raw.trim_end_matches(unit).trim_start_matches(unit).trim()
        };
        match number.parse::<f64>() {
            Ok(v) => Some(Reading::Number(v)),
            Err(_) => {
                self.errors.push(FieldConversionError {
                    field,
                    raw: raw.to_string(),
                });
                Some(Reading::Raw(raw.to_string()))
            }
        }
    }

    /// Boolean column. Unrecognised text keeps the previous value.
    pub fn flag(&mut self, index: usize, field: &'static str) -> Option<bool> {
        let raw = *self.fields.get(index)?;
        match parse_flag(raw) {
            Some(v) => Some(v),
            None => {
                self.errors.push(FieldConversionError {
                    field,
                    raw: raw.to_string(),
                });
                None
            }
        }
    }

    /// Free-text column.
    pub fn text(&self, index: usize) -> Option<String> {
        self.fields.get(index).map(|s| s.to_string())
    }

    /// Conversion problems collected while reading this line.
    pub fn errors(&self) -> &[FieldConversionError] {
        &self.errors
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" | "enabled" => Some(true),
        "false" | "0" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

/// A registry entry that can be refreshed from, and rendered as, a telemetry row.
pub trait TelemetryRow {
    /// Kind of entity this row type describes.
    const KIND: EntityKind;

    /// 1-based unit number.
    fn id(&self) -> usize;

    /// Apply the columns of a row that was attributed to this entity.
    fn update(&mut self, row: &mut RowFields<'_>);

    /// Render the entity as a tab-separated row in header column order.
    fn row(&self) -> String;
}

// =============================================================================
// Controller
// =============================================================================

/// A PID temperature-control loop.
#[derive(Debug, Clone, PartialEq)]
pub struct Controller {
    /// 1-based unit number
    pub id: usize,
    /// Proportional gain
    pub kp: Reading,
    /// Integral gain
    pub ki: Reading,
    /// Derivative gain
    pub kd: Reading,
    /// Proportional error term
    pub error_p: Reading,
    /// Derivative error term
    pub error_d: Reading,
    /// Integral error term
    pub error_i: Reading,
    /// Heater effort, 0-100%.
    pub effort: Reading,
    /// Latest sensor reading in °C
    pub temperature: Reading,
    /// Rolling-average temperature over the history window.
    pub average: Reading,
    /// Target temperature in °C
    pub setpoint: Reading,
    /// I2C address of the temperature sensor.
    pub sensor_address: Reading,
    /// Rolling-average window length
    pub history: Reading,
    /// Loop or pulse frequency
    pub frequency: Reading,
    /// Whether the unit is switched on
    pub enabled: bool,
    /// Sensor model as reported by the board
    pub sensor: String,
}

impl Controller {
    /// Zeroed unit with the given 1-based number.
    pub fn new(id: usize) -> Self {
        Self {
            id,
            kp: Reading::default(),
            ki: Reading::default(),
            kd: Reading::default(),
            error_p: Reading::default(),
            error_d: Reading::default(),
            error_i: Reading::default(),
            effort: Reading::default(),
            temperature: Reading::default(),
            average: Reading::default(),
            setpoint: Reading::default(),
            sensor_address: Reading::default(),
            history: Reading::default(),
            frequency: Reading::default(),
            enabled: false,
            sensor: "0".to_string(),
        }
    }

    /// Whether the rolling average sits strictly inside `target ± tolerance`.
    ///
    /// A non-numeric average (left behind by a garbled dump) counts as not
    /// there yet.
    pub fn is_within(&self, target: f64, tolerance: f64) -> bool {
        match self.average.as_f64() {
            Some(avg) => avg > target - tolerance && avg < target + tolerance,
            None => false,
        }
    }
}

impl TelemetryRow for Controller {
    const KIND: EntityKind = EntityKind::Controller;

    fn id(&self) -> usize {
        self.id
    }

    fn update(&mut self, row: &mut RowFields<'_>) {
        if let Some(v) = row.reading(1, "kp") {
            self.kp = v;
        }
        if let Some(v) = row.reading(2, "kd") {
            self.kd = v;
        }
        if let Some(v) = row.reading(3, "ki") {
            self.ki = v;
        }
        if let Some(v) = row.reading(4, "ep") {
            self.error_p = v;
        }
        if let Some(v) = row.reading(5, "ed") {
            self.error_d = v;
        }
        if let Some(v) = row.reading(6, "ei") {
            self.error_i = v;
        }
        if let Some(v) = row.reading(7, "effort") {
            self.effort = v;
        }
        if let Some(v) = row.reading_with_unit(8, "temp", "C") {
            self.temperature = v;
        }
        if let Some(v) = row.reading_with_unit(9, "average", "C") {
            self.average = v;
        }
        if let Some(v) = row.reading_with_unit(10, "target", "C") {
            self.setpoint = v;
        }
        if let Some(v) = row.reading(11, "i2c") {
            self.sensor_address = v;
        }
        if let Some(v) = row.reading(12, "hist") {
            self.history = v;
        }
        if let Some(v) = row.reading(13, "freq") {
            self.frequency = v;
        }
        if let Some(v) = row.flag(14, "enabled") {
            self.enabled = v;
        }
        if let Some(v) = row.text(15) {
            self.sensor = v;
        }
    }

    fn row(&self) -> String {
        format!(
            "{}{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            Self::KIND.row_prefix(),
            self.id,
            self.kp,
            self.kd,
            self.ki,
            self.error_p,
            self.error_d,
            self.error_i,
            self.effort,
            self.temperature,
            self.average,
            self.setpoint,
            self.sensor_address,
            self.history,
            self.frequency,
            self.enabled,
            self.sensor
        )
    }
}

// =============================================================================
// Compensator
// =============================================================================

/// A liquid-crystal driver channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Compensator {
    /// 1-based unit number
    pub id: usize,
    /// Peak-to-peak drive voltage.
    pub voltage: Reading,
    /// Tuning wavelength in nm
    pub wavelength: Reading,
    /// Latest sensor reading in °C
    pub temperature: Reading,
    /// Rolling-average temperature
    pub average: Reading,
    /// Auto-compensation active
    pub auto: bool,
    /// Auto-compensation tracks the rolling average instead of the latest reading
    pub use_average: bool,
    /// I2C address of the temperature sensor
    pub sensor_address: Reading,
    /// Whether the unit is switched on
    pub enabled: bool,
    /// Sensor model as reported by the board
    pub sensor: String,
}

impl Compensator {
    /// Zeroed unit with the given 1-based number.
    pub fn new(id: usize) -> Self {
        Self {
            id,
            voltage: Reading::default(),
            wavelength: Reading::default(),
            temperature: Reading::default(),
            average: Reading::default(),
            auto: false,
            use_average: false,
            sensor_address: Reading::default(),
            enabled: false,
            sensor: "0".to_string(),
        }
    }
}

impl TelemetryRow for Compensator {
    const KIND: EntityKind = EntityKind::Compensator;

    fn id(&self) -> usize {
        self.id
    }

    fn update(&mut self, row: &mut RowFields<'_>) {
        if let Some(v) = row.reading(1, "Peak2Peak") {
            self.voltage = v;
        }
        if let Some(v) = row.reading(2, "Wave") {
            self.wavelength = v;
        }
        if let Some(v) = row.reading_with_unit(3, "Temp", "C") {
            self.temperature = v;
        }
        if let Some(v) = row.reading_with_unit(4, "Avg", "C") {
            self.average = v;
        }
        if let Some(v) = row.flag(5, "Auto") {
            self.auto = v;
        }
        if let Some(v) = row.flag(6, "UseAverage") {
            self.use_average = v;
        }
        if let Some(v) = row.reading(7, "i2c") {
            self.sensor_address = v;
        }
        if let Some(v) = row.flag(8, "enabled") {
            self.enabled = v;
        }
        if let Some(v) = row.text(9) {
            self.sensor = v;
        }
    }

    fn row(&self) -> String {
        format!(
            "{}{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            Self::KIND.row_prefix(),
            self.id,
            self.voltage,
            self.wavelength,
            self.temperature,
            self.average,
            self.auto,
            self.use_average,
            self.sensor_address,
            self.enabled,
            self.sensor
        )
    }
}

// =============================================================================
// GPIO / Bipolar (read-only)
// =============================================================================

/// A general-purpose output line.
#[derive(Debug, Clone, PartialEq)]
pub struct Gpio {
    /// 1-based unit number
    pub id: usize,
    /// Output level
    pub state: bool,
}

impl Gpio {
    /// Zeroed unit with the given 1-based number.
    pub fn new(id: usize) -> Self {
        Self { id, state: false }
    }
}

impl TelemetryRow for Gpio {
    const KIND: EntityKind = EntityKind::Gpio;

    fn id(&self) -> usize {
        self.id
    }

    fn update(&mut self, row: &mut RowFields<'_>) {
        if let Some(v) = row.flag(1, "Enabled") {
            self.state = v;
        }
    }

    fn row(&self) -> String {
        format!("{}{}\t{}", Self::KIND.row_prefix(), self.id, self.state)
    }
}

/// A bipolar pulse output.
#[derive(Debug, Clone, PartialEq)]
pub struct Bipolar {
    /// 1-based unit number
    pub id: usize,
    /// Loop or pulse frequency
    pub frequency: Reading,
    /// Pulses per burst
    pub pulses: Reading,
    /// Peak-to-peak voltage
    pub voltage: Reading,
    /// Whether the unit is switched on
    pub enabled: bool,
}

impl Bipolar {
    /// Zeroed unit with the given 1-based number.
    pub fn new(id: usize) -> Self {
        Self {
            id,
            frequency: Reading::default(),
            pulses: Reading::default(),
            voltage: Reading::default(),
            enabled: false,
        }
    }
}

impl TelemetryRow for Bipolar {
    const KIND: EntityKind = EntityKind::Bipolar;

    fn id(&self) -> usize {
        self.id
    }

    fn update(&mut self, row: &mut RowFields<'_>) {
        if let Some(v) = row.reading(1, "frequency") {
            self.frequency = v;
        }
        if let Some(v) = row.reading(2, "pulses") {
            self.pulses = v;
        }
        if let Some(v) = row.reading(3, "Peak2Peak") {
            self.voltage = v;
        }
        if let Some(v) = row.flag(4, "Enabled") {
            self.enabled = v;
        }
    }

    fn row(&self) -> String {
        format!(
            "{}{}\t{}\t{}\t{}\t{}",
            Self::KIND.row_prefix(),
            self.id,
            self.frequency,
            self.pulses,
            self.voltage,
            self.enabled
        )
    }
}

// =============================================================================
// Registry
// =============================================================================

/// How many of each entity the board carries. Fixed for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityCounts {
    /// Number of Controllers
    pub controllers: usize,
    /// Number of Compensators
    pub compensators: usize,
    /// Number of GPIOs
    pub gpios: usize,
    /// Number of Bipolar outputs
    pub bipolars: usize,
}

impl Default for EntityCounts {
    fn default() -> Self {
        Self {
            controllers: 3,
            compensators: 6,
            gpios: 5,
            bipolars: 2,
        }
    }
}

/// Owned, fixed-length collections of every entity on the board.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRegistry {
    pub(crate) controllers: Vec<Controller>,
    pub(crate) compensators: Vec<Compensator>,
    pub(crate) gpios: Vec<Gpio>,
    pub(crate) bipolars: Vec<Bipolar>,
}

impl EntityRegistry {
    /// Build a zeroed registry numbered 1..=count for each kind.
    pub fn new(counts: EntityCounts) -> Self {
        Self {
            controllers: (1..=counts.controllers).map(Controller::new).collect(),
            compensators: (1..=counts.compensators).map(Compensator::new).collect(),
            gpios: (1..=counts.gpios).map(Gpio::new).collect(),
            bipolars: (1..=counts.bipolars).map(Bipolar::new).collect(),
        }
    }

    /// Counts this registry was built with.
    pub fn counts(&self) -> EntityCounts {
        EntityCounts {
            controllers: self.controllers.len(),
            compensators: self.compensators.len(),
            gpios: self.gpios.len(),
            bipolars: self.bipolars.len(),
        }
    }

    /// Number of units of `kind`.
    pub fn count(&self, kind: EntityKind) -> usize {
        match kind {
            EntityKind::Controller => self.controllers.len(),
            EntityKind::Compensator => self.compensators.len(),
            EntityKind::Gpio => self.gpios.len(),
            EntityKind::Bipolar => self.bipolars.len(),
        }
    }

    /// All Controllers, in unit order.
    pub fn controllers(&self) -> &[Controller] {
        &self.controllers
    }

    /// All Compensators, in unit order.
    pub fn compensators(&self) -> &[Compensator] {
        &self.compensators
    }

    /// All GPIOs, in unit order.
    pub fn gpios(&self) -> &[Gpio] {
        &self.gpios
    }

    /// All Bipolar outputs, in unit order.
    pub fn bipolars(&self) -> &[Bipolar] {
        &self.bipolars
    }

    /// Controller by 1-based unit number.
    pub fn controller(&self, unit: usize) -> Option<&Controller> {
        unit.checked_sub(1).and_then(|i| self.controllers.get(i))
    }

    /// Compensator by 1-based unit number.
    pub fn compensator(&self, unit: usize) -> Option<&Compensator> {
        unit.checked_sub(1).and_then(|i| self.compensators.get(i))
    }

    /// GPIO by 1-based unit number.
    pub fn gpio(&self, unit: usize) -> Option<&Gpio> {
        unit.checked_sub(1).and_then(|i| self.gpios.get(i))
    }

    /// Bipolar output by 1-based unit number.
    pub fn bipolar(&self, unit: usize) -> Option<&Bipolar> {
        unit.checked_sub(1).and_then(|i| self.bipolars.get(i))
    }

    /// Reject a unit number before anything is sent for it.
    pub fn check_unit(&self, kind: EntityKind, unit: usize) -> AppResult<()> {
        let count = self.count(kind);
        if unit == 0 || unit > count {
            return Err(TcbError::UnitOutOfRange { kind, unit, count });
        }
        Ok(())
    }

    pub(crate) fn controller_mut(&mut self, unit: usize) -> AppResult<&mut Controller> {
        self.check_unit(EntityKind::Controller, unit)?;
        Ok(&mut self.controllers[unit - 1])
    }

    pub(crate) fn compensator_mut(&mut self, unit: usize) -> AppResult<&mut Compensator> {
        self.check_unit(EntityKind::Compensator, unit)?;
        Ok(&mut self.compensators[unit - 1])
    }

    /// Column header for snapshot lines: `Date\tTime\t` then one header per
    /// entity instance, each followed by a tab.
    pub fn header_format(&self) -> String {
        let mut header = String::from("Date\tTime\t");
        for kind in EntityKind::ALL {
            for _ in 0..self.count(kind) {
                header.push_str(kind.header());
                header.push('\t');
            }
        }
        header
    }

    /// Every entity's row, in registry order, each followed by a tab.
    pub fn rows(&self) -> String {
        let mut out = String::new();
        push_rows(&mut out, &self.controllers);
        push_rows(&mut out, &self.compensators);
        push_rows(&mut out, &self.gpios);
        push_rows(&mut out, &self.bipolars);
        out
    }

    /// Render the registry the way the board prints its raw dump.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        push_block(&mut out, &self.controllers);
        push_block(&mut out, &self.compensators);
        push_block(&mut out, &self.gpios);
        push_block(&mut out, &self.bipolars);
        out
    }
}

fn push_rows<T: TelemetryRow>(out: &mut String, entities: &[T]) {
    for entity in entities {
        out.push_str(&entity.row());
        out.push('\t');
    }
}

fn push_block<T: TelemetryRow>(out: &mut String, entities: &[T]) {
    out.push_str(T::KIND.header());
    out.push_str("\r\n");
    for entity in entities {
        out.push_str(&entity.row());
        out.push_str("\r\n");
    }
}
