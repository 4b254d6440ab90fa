//! Serial transport for the Tuning Control Board.
//!
//! Protocol Overview:
//! - Format: short ASCII tokens, no framing byte, no checksum
//! - Baud: 9600 by default, 8N1, no flow control
//! - Terminator: CR (`\r`) on commands; replies are free-form text
//!
//! The board gives no end-of-reply marker, so [`Transport::read_all`] drains
//! whatever arrives before the line goes quiet or the read timeout elapses.
//! Invalid UTF-8 is replaced rather than rejected.
//!
//! Transport faults are returned as errors here; the retry coordinator is the
//! one place that turns them into a reconnect.

use crate::config::SerialConfig;
use crate::error::AppResult;
#[cfg(not(feature = "instrument_serial"))]
use crate::error::TcbError;
use std::time::Duration;
#[cfg(feature = "instrument_serial")]
use tracing::{debug, trace};

#[cfg(feature = "instrument_serial")]
use serialport::{ClearBuffer, SerialPort};
#[cfg(feature = "instrument_serial")]
use std::io::{Read, Write};
use std::time::Instant;

/// Line terminator appended to every command.
pub const COMMAND_TERMINATOR: &str = "\r";

/// Once bytes have arrived, the reply is considered complete after this much silence.
const QUIET_GAP: Duration = Duration::from_millis(50);

/// Poll interval while waiting for bytes.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Byte link to the board.
///
/// Implementations must not block longer than their configured timeouts.
pub trait Transport {
    /// Acquire the link and discard anything buffered on it.
    fn open(&mut self) -> AppResult<()>;

    /// Release the link. Closing a closed transport is a no-op.
    fn close(&mut self);

    /// Tear the link down and bring it back up.
    fn reconnect(&mut self) -> AppResult<()> {
        self.close();
        self.open()
    }

    /// Drop unread input and unsent output.
    fn clear_buffers(&mut self) -> AppResult<()>;

    /// Write `line` followed by the carriage-return terminator.
    fn write_line(&mut self, line: &str) -> AppResult<()>;

    /// Drain whatever the board has sent, as text.
    fn read_all(&mut self) -> AppResult<String>;

    /// Whether the link is currently held.
    fn is_open(&self) -> bool;

    /// Human-readable name of the link, used in diagnostics.
    fn describe(&self) -> String;
}

/// RS-232/USB-serial link to a physical board.
pub struct SerialTransport {
    /// Port name (e.g., "/dev/ttyUSB0", "COM6")
    port_name: String,

    /// Baud rate (e.g., 9600)
    baud_rate: u32,

    read_timeout: Duration,

    write_timeout: Duration,

    #[cfg(feature = "instrument_serial")]
    port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    /// Create a closed transport with 1s read and write timeouts.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            read_timeout: Duration::from_secs(1),
            write_timeout: Duration::from_secs(1),
            #[cfg(feature = "instrument_serial")]
            port: None,
        }
    }

    /// Create a closed transport from the `[serial]` configuration section.
    pub fn from_config(config: &SerialConfig) -> Self {
        Self::new(config.port.clone(), config.baud_rate)
            .with_read_timeout(config.read_timeout)
            .with_write_timeout(config.write_timeout)
    }

    /// Set the per-reply read timeout.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the per-command write timeout.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Device path or COM name.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Configured baud rate.
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }
}

#[cfg(feature = "instrument_serial")]
impl SerialTransport {
    fn port_mut(&mut self) -> AppResult<&mut Box<dyn SerialPort>> {
        self.port
            .as_mut()
            .ok_or(crate::error::TcbError::SerialPortNotConnected)
    }
}

#[cfg(feature = "instrument_serial")]
impl Transport for SerialTransport {
    fn open(&mut self) -> AppResult<()> {
        let port = serialport::new(&self.port_name, self.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(self.write_timeout)
            .open()?;
        port.clear(ClearBuffer::All)?;

        self.port = Some(port);
        debug!(
            port = %self.port_name,
            baud = self.baud_rate,
            "Serial port opened"
        );
        Ok(())
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!(port = %self.port_name, "Serial port closed");
        }
    }

    fn clear_buffers(&mut self) -> AppResult<()> {
        self.port_mut()?.clear(ClearBuffer::All)?;
        Ok(())
    }

    fn write_line(&mut self, line: &str) -> AppResult<()> {
        let write_timeout = self.write_timeout;
        let port = self.port_mut()?;
        port.set_timeout(write_timeout)?;
        let framed = format!("{}{}", line, COMMAND_TERMINATOR);
        port.write_all(framed.as_bytes())?;
        port.flush()?;
        trace!(command = %framed.escape_default(), "Wrote command");
        Ok(())
    }

    fn read_all(&mut self) -> AppResult<String> {
        let read_timeout = self.read_timeout;
        let port = self.port_mut()?;

        let response = drain_reply(read_timeout, |buffer| {
            let available = port.bytes_to_read()? as usize;
            if available == 0 {
                return Ok(0);
            }
            let len = available.min(buffer.len());
            Ok(port.read(&mut buffer[..len])?)
        })?;

        let text = String::from_utf8_lossy(&response).into_owned();
        trace!(bytes = response.len(), response = %text.escape_default(), "Read response");
        Ok(text)
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn describe(&self) -> String {
        format!("{} @ {} baud", self.port_name, self.baud_rate)
    }
}

#[cfg(not(feature = "instrument_serial"))]
impl Transport for SerialTransport {
    fn open(&mut self) -> AppResult<()> {
        Err(TcbError::SerialFeatureDisabled)
    }

    fn close(&mut self) {}

    fn clear_buffers(&mut self) -> AppResult<()> {
        Err(TcbError::SerialFeatureDisabled)
    }

    fn write_line(&mut self, _line: &str) -> AppResult<()> {
        Err(TcbError::SerialFeatureDisabled)
    }

    fn read_all(&mut self) -> AppResult<String> {
        Err(TcbError::SerialFeatureDisabled)
    }

    fn is_open(&self) -> bool {
        false
    }

    fn describe(&self) -> String {
        format!("{} @ {} baud", self.port_name, self.baud_rate)
    }
}

/// Collect reply bytes until the line goes quiet or `read_timeout` elapses.
///
/// `read_available` fills the buffer with whatever is pending and returns the
/// count, or 0 when nothing is waiting. The deadline holds even while bytes
/// keep arriving.
#[cfg_attr(not(feature = "instrument_serial"), allow(dead_code))]
fn drain_reply<F>(read_timeout: Duration, mut read_available: F) -> AppResult<Vec<u8>>
where
    F: FnMut(&mut [u8]) -> AppResult<usize>,
{
    let deadline = Instant::now() + read_timeout;
    let mut response: Vec<u8> = Vec::new();
    let mut buffer = [0u8; 1024];
    let mut last_data = Instant::now();

    while Instant::now() < deadline {
        let n = read_available(&mut buffer)?;
        if n > 0 {
            response.extend_from_slice(&buffer[..n]);
            last_data = Instant::now();
            continue;
        }
        if !response.is_empty() && last_data.elapsed() >= QUIET_GAP {
            break;
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    Ok(response)
}
