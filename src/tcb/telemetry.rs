//! Telemetry Parser
//!
//! Turns the board's raw dump (the reply to `r`) into registry updates. A dump
//! is four blocks, each a header line followed by one row per instance:
//!
//! ```text
//! Cont\tkp\tkd\t...           <- controller header
//! Cont1\t1.5\t0.2\t...
//! Comp\tPeak2Peak\t...        <- compensator header
//! Comp1\t3.2\t...
//! GPIO\tEnabled
//! GPIO1\ttrue
//! Bipolar\tfrequency\t...
//! Bipolar1\t10\t...
//! ```
//!
//! Blocks are located by their headers and may arrive in any order. If any
//! header is missing, or two headers run together on one line, the dump is
//! treated as a desync and discarded whole.

use crate::error::ParseError;
use crate::tcb::entities::{EntityKind, EntityRegistry, RowFields, TelemetryRow};
use tracing::{debug, warn};

/// Result of applying one dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryStatus {
    /// All four blocks were found and applied.
    Complete,
    /// The dump was discarded; the registry is unchanged.
    Desync(Vec<ParseError>),
}

impl TelemetryStatus {
    /// All four blocks were applied.
    pub fn is_complete(&self) -> bool {
        matches!(self, TelemetryStatus::Complete)
    }
}

/// Line index of each kind's header, or the headers that could not be found.
pub fn locate_headers(lines: &[&str]) -> Result<[(EntityKind, usize); 4], Vec<ParseError>> {
    let mut found = Vec::with_capacity(EntityKind::ALL.len());
    let mut missing = Vec::new();

    for kind in EntityKind::ALL {
        match lines.iter().position(|line| is_header(line, kind)) {
            Some(index) => found.push((kind, index)),
            None => missing.push(ParseError::MissingHeader(kind)),
        }
    }

    if !missing.is_empty() {
        return Err(missing);
    }
    Ok([found[0], found[1], found[2], found[3]])
}

/// A header line either carries the full column header or starts with the bare
/// kind name. Rows always carry a unit number after the name.
fn is_header(line: &str, kind: EntityKind) -> bool {
    if line.contains(kind.header()) {
        return true;
    }
    line.split('\t').next().map(str::trim) == Some(kind.row_prefix())
}

/// Apply a raw dump to `registry`.
///
/// Lines are split on `\n`; a trailing `\r` on each line is ignored.
pub fn parse_dump(raw: &str, registry: &mut EntityRegistry) -> TelemetryStatus {
    let lines: Vec<&str> = raw.lines().collect();

    let mut headers = match locate_headers(&lines) {
        Ok(headers) => headers,
        Err(missing) => {
            for err in &missing {
                warn!("{}", err);
            }
            return TelemetryStatus::Desync(missing);
        }
    };

    headers.sort_by_key(|(_, index)| *index);

    let merged: Vec<ParseError> = headers
        .windows(2)
        .filter(|pair| pair[0].1 == pair[1].1)
        .map(|pair| ParseError::SharedHeaderLine {
            first: pair[0].0,
            second: pair[1].0,
        })
        .collect();
    if !merged.is_empty() {
        for err in &merged {
            warn!("{}", err);
        }
        return TelemetryStatus::Desync(merged);
    }

    for (position, (kind, start)) in headers.iter().enumerate() {
        let end = headers
            .get(position + 1)
            .map(|(_, index)| *index)
            .unwrap_or(lines.len());
        let block = &lines[start + 1..end];

        match kind {
            EntityKind::Controller => apply_block(block, &mut registry.controllers),
            EntityKind::Compensator => apply_block(block, &mut registry.compensators),
            EntityKind::Gpio => apply_block(block, &mut registry.gpios),
            EntityKind::Bipolar => apply_block(block, &mut registry.bipolars),
        }
    }

    TelemetryStatus::Complete
}

/// Attribute each line of a block to the entity whose number it carries.
///
/// Candidates are tried from the highest number down so that `Comp12` is not
/// claimed by unit 1.
fn apply_block<T: TelemetryRow>(block: &[&str], entities: &mut [T]) {
    for line in block {
        let mut row = RowFields::new(line);
        if row.is_empty() {
            continue;
        }
        let token = row.token();

        let Some(entity) = entities
            .iter_mut()
            .rev()
            .find(|entity| token.contains(&entity.id().to_string()))
        else {
            debug!(
                "{}",
                ParseError::UnknownEntity {
                    kind: T::KIND,
                    token: token.to_string(),
                }
            );
            continue;
        };

        entity.update(&mut row);
        for err in row.errors() {
            debug!(kind = %T::KIND, unit = entity.id(), "{}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tcb::entities::{EntityCounts, Reading};

    const CONTROLLERS: &str = "Cont\tkp\tkd\tki\tep\ted\tei\teffort\ttemp\taverage\ttarget\ti2c\thist\tfreq\tenabled\tsensor\r\n\
Cont1\t1\t0\t0\t0\t0\t0\t10\t24.0C\t24.1C\t25.00C\t72\t26\t200\ttrue\tTMP117\r\n\
Cont2\t2\t0\t0\t0\t0\t0\t0\t21.0C\t21.0C\t0.00C\t73\t26\t200\tfalse\tTMP117\r\n";
    const COMPENSATORS: &str = "Comp\tPeak2Peak\tWave\tTemp\tAvg\tAuto\tUseAverage\ti2c\tenabled\tsensor\r\n\
Comp1\t3.5\t656\t24.0C\t24.0C\tfalse\ttrue\t74\ttrue\tTMP117\r\n";
    const GPIOS: &str = "GPIO\tEnabled\r\nGPIO1\ttrue\r\nGPIO2\tfalse\r\n";
    const BIPOLARS: &str = "Bipolar\tfrequency\tpulses\tPeak2Peak\tEnabled\r\nBipolar1\t10\t3\t5\ttrue\r\n";

    fn registry() -> EntityRegistry {
        EntityRegistry::new(EntityCounts {
            controllers: 2,
            compensators: 1,
            gpios: 2,
            bipolars: 1,
        })
    }

    #[test]
    fn test_complete_dump_updates_every_kind() {
        let mut reg = registry();
        let dump = format!("{}{}{}{}", CONTROLLERS, COMPENSATORS, GPIOS, BIPOLARS);
        assert_eq!(parse_dump(&dump, &mut reg), TelemetryStatus::Complete);

        let c1 = reg.controller(1).unwrap();
        assert_eq!(c1.setpoint, Reading::Number(25.0));
        assert_eq!(c1.temperature, Reading::Number(24.0));
        assert!(c1.enabled);
        assert_eq!(reg.controller(2).unwrap().kp, Reading::Number(2.0));
        assert_eq!(reg.compensator(1).unwrap().voltage, Reading::Number(3.5));
        assert!(reg.compensator(1).unwrap().use_average);
        assert!(reg.gpio(1).unwrap().state);
        assert!(!reg.gpio(2).unwrap().state);
        assert_eq!(reg.bipolar(1).unwrap().pulses, Reading::Number(3.0));
    }

    #[test]
    fn test_block_order_does_not_matter() {
        let mut in_order = registry();
        parse_dump(
            &format!("{}{}{}{}", CONTROLLERS, COMPENSATORS, GPIOS, BIPOLARS),
            &mut in_order,
        );

        for dump in [
            format!("{}{}{}{}", COMPENSATORS, GPIOS, BIPOLARS, CONTROLLERS),
            format!("{}{}{}{}", BIPOLARS, GPIOS, CONTROLLERS, COMPENSATORS),
        ] {
            let mut shuffled = registry();
            assert!(parse_dump(&dump, &mut shuffled).is_complete());
            assert_eq!(in_order, shuffled);
        }
    }

    #[test]
    fn test_missing_header_discards_whole_dump() {
        let mut reg = registry();
        let before = reg.clone();
        let dump = format!("{}{}{}", CONTROLLERS, COMPENSATORS, BIPOLARS);

        let status = parse_dump(&dump, &mut reg);
        assert_eq!(
            status,
            TelemetryStatus::Desync(vec![ParseError::MissingHeader(EntityKind::Gpio)])
        );
        assert_eq!(reg, before);
    }

    #[test]
    fn test_empty_dump_reports_every_header() {
        let mut reg = registry();
        match parse_dump("", &mut reg) {
            TelemetryStatus::Desync(missing) => assert_eq!(missing.len(), 4),
            TelemetryStatus::Complete => panic!("empty dump parsed as complete"),
        }
    }

    #[test]
    fn test_two_digit_ids_match_the_right_unit() {
        let mut reg = EntityRegistry::new(EntityCounts {
            controllers: 1,
            compensators: 12,
            gpios: 1,
            bipolars: 1,
        });
        let dump = format!(
            "{}{}Comp12\t9.5\r\n{}{}",
            CONTROLLERS, "Comp\tPeak2Peak\tWave\tTemp\tAvg\tAuto\tUseAverage\ti2c\tenabled\tsensor\r\n", GPIOS, BIPOLARS
        );
        assert!(parse_dump(&dump, &mut reg).is_complete());
        assert_eq!(reg.compensator(12).unwrap().voltage, Reading::Number(9.5));
        assert_eq!(reg.compensator(1).unwrap().voltage, Reading::Number(0.0));
    }

    #[test]
    fn test_unknown_rows_are_skipped() {
        let mut reg = registry();
        let dump = format!(
            "{}{}{}GPIO9\ttrue\r\n{}",
            CONTROLLERS, COMPENSATORS, GPIOS, BIPOLARS
        );
        assert!(parse_dump(&dump, &mut reg).is_complete());
        assert!(reg.gpio(1).unwrap().state);
    }

    #[test]
    fn test_registry_dump_parses_back() {
        let mut source = registry();
        source.controllers[0].setpoint = Reading::Number(30.0);
        source.gpios[1].state = true;

        let mut target = registry();
        assert!(parse_dump(&source.dump(), &mut target).is_complete());
        assert_eq!(source, target);
    }

    #[test]
    fn test_sensor_named_like_a_kind_is_not_a_header() {
        let lines = ["Cont1\t1\tGPIO", "GPIO\tEnabled"];
        assert!(!is_header(lines[0], EntityKind::Gpio));
        assert!(is_header(lines[1], EntityKind::Gpio));
    }

    #[test]
    fn test_headers_on_one_line_discard_dump() {
        let mut reg = registry();
        let before = reg.clone();
        let glued = format!(
            "{}{}GPIO\tEnabled{}",
            CONTROLLERS, COMPENSATORS, BIPOLARS
        );

        let status = parse_dump(&glued, &mut reg);

        assert_eq!(
            status,
            TelemetryStatus::Desync(vec![ParseError::SharedHeaderLine {
                first: EntityKind::Gpio,
                second: EntityKind::Bipolar,
            }])
        );
        assert_eq!(reg, before);
    }
}
