//! Telemetry parsing against realistic and damaged dumps
//!
//! Dumps here are shaped like captures from the board: CRLF line endings,
//! `C` suffixes on temperatures, and the occasional non-numeric field.

use lfdi_tcb::hardware::MockTcb;
use lfdi_tcb::tcb::{
    parse_dump, EntityCounts, EntityKind, EntityRegistry, Reading, RetryPolicy, SessionOptions,
    TcbSession, TelemetryStatus,
};
use lfdi_tcb::error::ParseError;
use std::time::Duration;
use tracing_test::traced_test;

const DUMP: &str = "\
Cont\tkp\tkd\tki\tep\ted\tei\teffort\ttemp\taverage\ttarget\ti2c\thist\tfreq\tenabled\tsensor\r\n\
Cont1\t4.00\t0.50\t0.02\t0.13\t0.00\t1.20\t37.00\t34.87C\t34.90C\t35.00C\t72\t26\t200\ttrue\tTMP117\r\n\
Cont2\t1.00\t0.00\t0.00\t0.00\t0.00\t0.00\t0.00\t22.10C\t22.08C\tNone\t73\t26\t200\tfalse\tTMP117\r\n\
Cont3\t1.00\t0.00\t0.00\t0.00\t0.00\t0.00\t0.00\t22.30C\t22.31C\t0.00C\t74\t26\t200\tfalse\tTMP117\r\n\
Comp\tPeak2Peak\tWave\tTemp\tAvg\tAuto\tUseAverage\ti2c\tenabled\tsensor\r\n\
Comp1\t3.20\t656.28\t34.80C\t34.85C\tfalse\ttrue\t72\ttrue\tTMP117\r\n\
Comp2\t0.00\t0.00\t22.10C\t22.10C\tfalse\tfalse\t0\tfalse\tNone\r\n\
GPIO\tEnabled\r\n\
GPIO1\ttrue\r\n\
GPIO2\tfalse\r\n\
Bipolar\tfrequency\tpulses\tPeak2Peak\tEnabled\r\n\
Bipolar1\t100\t5\t2.5\ttrue\r\n";

fn counts() -> EntityCounts {
    EntityCounts {
        controllers: 3,
        compensators: 2,
        gpios: 2,
        bipolars: 1,
    }
}

fn options() -> SessionOptions {
    SessionOptions {
        counts: counts(),
        retry: RetryPolicy {
            max_retries: 3,
            settle_interval: Duration::ZERO,
        },
        reset_settle: Duration::ZERO,
    }
}

/// Move the block that starts at `header` to the front of the dump.
fn with_block_first(dump: &str, header: &str, next_header: Option<&str>) -> String {
    let start = dump.find(header).unwrap();
    let end = next_header
        .map(|h| dump.find(h).unwrap())
        .unwrap_or(dump.len());
    format!("{}{}{}", &dump[start..end], &dump[..start], &dump[end..])
}

#[test]
fn test_captured_dump_parses() {
    let mut registry = EntityRegistry::new(counts());

    assert_eq!(parse_dump(DUMP, &mut registry), TelemetryStatus::Complete);

    let c1 = registry.controller(1).unwrap();
    assert_eq!(c1.effort, Reading::Number(37.0));
    assert_eq!(c1.average, Reading::Number(34.9));
    assert!(c1.is_within(35.0, 0.2));

    // Idle loops report a placeholder setpoint; it is kept verbatim.
    let c2 = registry.controller(2).unwrap();
    assert_eq!(c2.setpoint, Reading::Raw("None".to_string()));
    assert_eq!(c2.sensor_address, Reading::Number(73.0));

    let comp = registry.compensator(1).unwrap();
    assert_eq!(comp.wavelength, Reading::Number(656.28));
    assert!(comp.enabled && comp.use_average && !comp.auto);

    assert!(registry.gpio(1).unwrap().state);
    assert_eq!(registry.bipolar(1).unwrap().frequency, Reading::Number(100.0));
}

#[test]
fn test_reordered_blocks_give_same_state() {
    let mut reference = EntityRegistry::new(counts());
    parse_dump(DUMP, &mut reference);

    for (header, next) in [
        ("GPIO\tEnabled", Some("Bipolar\tfrequency")),
        ("Bipolar\tfrequency", None),
        ("Comp\tPeak2Peak", Some("GPIO\tEnabled")),
    ] {
        let shuffled = with_block_first(DUMP, header, next);
        let mut registry = EntityRegistry::new(counts());
        assert!(parse_dump(&shuffled, &mut registry).is_complete());
        assert_eq!(registry, reference, "block {:?} moved first", header);
    }
}

#[traced_test]
#[test]
fn test_missing_gpio_header_is_reported_and_keeps_previous_poll() {
    let mut registry = EntityRegistry::new(counts());
    parse_dump(DUMP, &mut registry);
    let previous = registry.clone();

    let damaged = DUMP.replace("GPIO\tEnabled\r\n", "");
    let changed = damaged.replace("34.87C", "99.00C");
    let status = parse_dump(&changed, &mut registry);

    assert_eq!(
        status,
        TelemetryStatus::Desync(vec![ParseError::MissingHeader(EntityKind::Gpio)])
    );
    assert_eq!(registry, previous);
    assert!(logs_contain("possible desync"));
}

#[traced_test]
#[test]
fn test_session_survives_truncated_dump() {
    let truncated = DUMP.split("GPIO\tEnabled").next().unwrap().to_string();
    let mut tcb = TcbSession::open(MockTcb::new(counts()).with_dump(truncated), options()).unwrap();

    let status = tcb.refresh().unwrap();

    assert!(!status.is_complete());
    assert_eq!(tcb.controller(1).unwrap().temperature, Reading::Number(0.0));
    assert!(logs_contain("possible desync"));

    // The snapshot still renders from the stale mirror.
    let line = tcb.get_info().unwrap();
    assert!(line.contains("Cont1\t0\t"));
}

#[traced_test]
#[test]
fn test_unconfirmed_command_is_logged() {
    let mut tcb = TcbSession::open(MockTcb::new(counts()).never_acknowledge(), options()).unwrap();

    tcb.set_controller_setpoint(1, 25.0).unwrap();

    assert!(logs_contain("Expected response 'Target temperature set to'"));
    assert!(logs_contain("Too many attempts"));
}

#[traced_test]
#[test]
fn test_session_survives_headers_run_together() {
    let glued = DUMP.replace("GPIO\tEnabled\r\nGPIO1\ttrue\r\nGPIO2\tfalse\r\n", "GPIO\tEnabled");
    let mut tcb = TcbSession::open(MockTcb::new(counts()).with_dump(glued), options()).unwrap();

    let status = tcb.refresh().unwrap();

    assert!(!status.is_complete());
    assert!(logs_contain("headers share one line"));
    assert!(tcb.get_info().is_ok());
}
