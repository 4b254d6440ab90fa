//! CLI Entry Point for lfdi_tcb
//!
//! Provides command-line access to a Tuning Control Board:
//! - Printing the snapshot header and one-shot snapshots
//! - Monitoring telemetry as a TSV stream on stdout
//! - Holding a controller at a setpoint until it settles
//! - Resetting the board and sending raw console tokens
//!
//! Logs go to stderr, so stdout can be redirected straight into a TSV file.
//! Leaving any command disables every controller and compensator on the board.
//!
//! # Usage
//!
//! ```bash
//! lfdi_tcb --port /dev/ttyUSB0 monitor --interval 5s > run.tsv
//! lfdi_tcb hold --controller 1 --setpoint 35 --tolerance 0.1
//! lfdi_tcb --mock hold --controller 2 --setpoint 30
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lfdi_tcb::config::{TcbConfig, DEFAULT_CONFIG_PATH};
use lfdi_tcb::hardware::{MockTcb, Transport};
use lfdi_tcb::tcb::{ControllerCommand, EntityRegistry, SessionOptions, TcbSession};
use lfdi_tcb::logging::{self, TracingConfig};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Ambient temperature the simulated board starts at.
const MOCK_AMBIENT: f64 = 21.0;

#[derive(Parser)]
#[command(name = "lfdi_tcb")]
#[command(about = "Command and telemetry client for the LFDI Tuning Control Board", long_about = None)]
struct Cli {
    /// Configuration file (defaults to config/tcb.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Serial port, overriding the configuration
    #[arg(long, global = true)]
    port: Option<String>,

    /// Talk to a simulated board instead of a serial port
    #[arg(long, global = true)]
    mock: bool,

    /// Log format (pretty, compact, json), overriding the configuration
    #[arg(long, global = true)]
    log_format: Option<String>,

    /// Disable colored log output
    #[arg(long, global = true)]
    no_color: bool,

    /// Log span open/close events (per-command timing)
    #[arg(long, global = true)]
    log_spans: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the TSV header matching `info` and `monitor` lines
    Header,

    /// Refresh telemetry once and print a snapshot line
    Info,

    /// Print a snapshot line at a fixed interval
    Monitor {
        /// Time between snapshots (e.g. "5s", "500ms")
        #[arg(long, default_value = "5s", value_parser = humantime::parse_duration)]
        interval: Duration,

        /// Stop after this many snapshots (runs until interrupted if omitted)
        #[arg(long)]
        samples: Option<u64>,
    },

    /// Drive a controller to a setpoint and log until it is within tolerance
    Hold {
        /// Controller unit (1-based)
        #[arg(long)]
        controller: usize,

        /// Target temperature in °C
        #[arg(long, allow_hyphen_values = true)]
        setpoint: f64,

        #[arg(long)]
        kp: Option<f64>,

        #[arg(long)]
        ki: Option<f64>,

        #[arg(long)]
        kd: Option<f64>,

        /// Allowed distance of the rolling average from the setpoint
        #[arg(long, default_value = "0.1")]
        tolerance: f64,

        #[arg(long, default_value = "5s", value_parser = humantime::parse_duration)]
        interval: Duration,

        /// Give up after this many snapshots
        #[arg(long, default_value = "120")]
        samples: u64,
    },

    /// Reboot the board (waits for it to come back)
    Reset,

    /// Send a raw console token in the current menu
    Send {
        token: String,

        /// Substring the reply must contain
        #[arg(long)]
        expect: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let mut config = TcbConfig::load_from(&path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    if let Some(port) = cli.port {
        config.serial.port = port;
    }
    config.validate()?;
    let mut tracing_config = TracingConfig::from_config(&config)?
        .with_ansi(!cli.no_color)
        .with_span_events(cli.log_spans);
    if let Some(format) = &cli.log_format {
        tracing_config = tracing_config.with_format(format.parse()?);
    }
    logging::init(tracing_config)?;

    if let Commands::Header = cli.command {
        println!("{}", EntityRegistry::new(config.entities).header_format());
        return Ok(());
    }

    if cli.mock {
        let mut options = SessionOptions::from_config(&config);
        options.retry.settle_interval = Duration::ZERO;
        options.reset_settle = Duration::ZERO;

        let mut board = MockTcb::new(config.entities);
        for unit in 1..=config.entities.controllers {
            board = board.with_controller_temperature(unit, MOCK_AMBIENT);
        }
        info!("Using simulated board");
        run(TcbSession::open(board, options)?, cli.command)
    } else {
        let session = TcbSession::connect(&config)
            .with_context(|| format!("Failed to open {}", config.serial.port))?;
        run(session, cli.command)
    }
}

fn run<T: Transport>(mut tcb: TcbSession<T>, command: Commands) -> Result<()> {
    match command {
        Commands::Header => println!("{}", tcb.header_format()),
        Commands::Info => println!("{}", tcb.get_info()?),
        Commands::Monitor { interval, samples } => {
            println!("{}", tcb.header_format());
            let mut taken = 0;
            while samples.map_or(true, |limit| taken < limit) {
                if taken > 0 {
                    std::thread::sleep(interval);
                }
                println!("{}", tcb.get_info()?);
                taken += 1;
            }
        }
        Commands::Hold {
            controller,
            setpoint,
            kp,
            ki,
            kd,
            tolerance,
            interval,
            samples,
        } => {
            let gains = [
                kp.map(ControllerCommand::Kp),
                ki.map(ControllerCommand::Ki),
                kd.map(ControllerCommand::Kd),
            ];
            for command in gains.into_iter().flatten() {
                tcb.set_controller(controller, command)?;
            }
            tcb.set_controller_setpoint(controller, setpoint)?;
            tcb.set_controller_enable(controller, true)?;

            println!("{}", tcb.header_format());
            let mut reached = false;
            for _ in 0..samples {
                std::thread::sleep(interval);
                println!("{}", tcb.get_info()?);
                if tcb
                    .controller(controller)
                    .map_or(false, |c| c.is_within(setpoint, tolerance))
                {
                    reached = true;
                    break;
                }
            }
            if reached {
                info!(controller, setpoint, "Controller reached setpoint");
            } else {
                warn!(controller, setpoint, samples, "Controller did not settle");
            }
        }
        Commands::Reset => {
            tcb.reset()?;
            info!("Board reset");
        }
        Commands::Send { token, expect } => {
            let outcome = tcb.send(&token, expect.as_deref())?;
            info!(status = ?outcome.status, attempts = outcome.attempts, "Command sent");
            print!("{}", outcome.response);
        }
    }

    tcb.close()?;
    Ok(())
}
