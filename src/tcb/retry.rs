//! Retry Coordinator
//!
//! Every byte sent to the board goes through [`RetryCoordinator::send`]:
//!
//! ```text
//! Idle -> Sending -> AwaitingResponse -> Verified
//!                                     -> Retrying -> Sending ...
//!                                     -> Reconnected (retries exhausted)
//! ```
//!
//! The board has no framing or checksum, so the only evidence a command landed
//! is a known substring in the reply. A missing substring is a desync: the
//! command is re-sent up to `max_retries` times, after which the transport is
//! reconnected once and whatever was last received is returned, marked
//! [`SendStatus::Reconnected`]. Transport faults are absorbed the same way.
//! Only a reconnect that itself fails escapes as [`TcbError::ConnectionFault`].

use crate::error::{AppResult, DesyncError, TcbError};
use crate::hardware::transport::Transport;
use std::time::Duration;
use tracing::{debug, instrument, trace, warn};

/// Default number of re-sends after the first attempt.
pub const MAX_RETRIES: u32 = 3;

/// Default wait between writing a command and reading the reply.
pub const DEFAULT_SETTLE_INTERVAL: Duration = Duration::from_millis(500);

/// How hard to try before giving up on a command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Re-sends after the first attempt. Total writes are `max_retries + 1`.
    pub max_retries: u32,

    /// Time the board gets to answer before the reply is read.
    pub settle_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            settle_interval: DEFAULT_SETTLE_INTERVAL,
        }
    }
}

/// How a send ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// The reply contained the expected substring.
    Verified,
    /// No substring was expected; the reply is returned as-is.
    Unchecked,
    /// Retries ran out and the link was reset. The command's effect is unknown;
    /// re-poll telemetry before trusting local state.
    Reconnected,
}

/// Reply to a command plus how it was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    /// Last reply received
    pub response: String,
    /// Writes performed, including the first.
    pub attempts: u32,
    /// Whether the reply was verified
    pub status: SendStatus,
}

impl SendOutcome {
    /// The board confirmed the command.
    pub fn is_verified(&self) -> bool {
        self.status == SendStatus::Verified
    }
}

/// Running totals, mostly for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryStats {
    /// Commands sent
    pub commands: u64,
    /// Re-sends after an unexpected reply or a link fault
    pub retries: u64,
    /// Link resets
    pub reconnects: u64,
}

/// Owns the transport and enforces verify/retry/reconnect on every command.
pub struct RetryCoordinator<T: Transport> {
    transport: T,
    policy: RetryPolicy,
    stats: RetryStats,
}

impl<T: Transport> RetryCoordinator<T> {
    /// Wrap an open transport.
    pub fn new(transport: T, policy: RetryPolicy) -> Self {
        Self {
            transport,
            policy,
            stats: RetryStats::default(),
        }
    }

    /// Underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Underlying transport, mutably.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Retry policy in use.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Totals since construction.
    pub fn stats(&self) -> RetryStats {
        self.stats
    }

    /// Send `command`, verifying the reply contains `expected` when given.
    #[instrument(level = "debug", skip(self))]
    pub fn send(&mut self, command: &str, expected: Option<&str>) -> AppResult<SendOutcome> {
        self.stats.commands += 1;
        let mut last_response = String::new();

        for attempt in 0..=self.policy.max_retries {
            if attempt > 0 {
                self.stats.retries += 1;
                debug!(attempt, "Retrying command");
            }

            let response = match self.exchange(command) {
                Ok(response) => response,
                Err(err) => {
                    warn!(error = %err, attempt, "Transport fault, reconnecting");
                    self.reconnect()?;
                    continue;
                }
            };

            match expected {
                None => {
                    return Ok(SendOutcome {
                        response,
                        attempts: attempt + 1,
                        status: SendStatus::Unchecked,
                    })
                }
                Some(needle) if response.contains(needle) => {
                    return Ok(SendOutcome {
                        response,
                        attempts: attempt + 1,
                        status: SendStatus::Verified,
                    })
                }
                Some(needle) => {
                    let desync = DesyncError {
                        command: command.to_string(),
                        expected: needle.to_string(),
                        response: response.trim().to_string(),
                    };
                    warn!(attempt, "{}", desync);
                    last_response = response;
                }
            }
        }

        warn!(
            attempts = self.policy.max_retries + 1,
            "Too many attempts, restarting connection"
        );
        self.reconnect()?;
        Ok(SendOutcome {
            response: last_response,
            attempts: self.policy.max_retries + 1,
            status: SendStatus::Reconnected,
        })
    }

    /// Tear down and reopen the link. Failure here is terminal.
    pub fn reconnect(&mut self) -> AppResult<()> {
        self.stats.reconnects += 1;
        self.transport
            .reconnect()
            .map_err(|err| TcbError::ConnectionFault {
                port: self.transport.describe(),
                message: err.to_string(),
            })
    }

    /// Close the link for good.
    pub fn close(&mut self) {
        self.transport.close();
    }

    fn exchange(&mut self, command: &str) -> AppResult<String> {
        self.transport.clear_buffers()?;
        debug!(command, "Sending command");
        self.transport.write_line(command)?;
        if !self.policy.settle_interval.is_zero() {
            std::thread::sleep(self.policy.settle_interval);
        }
        let response = self.transport.read_all()?;
        trace!(response = %response.escape_default(), "Received response");
        Ok(response)
    }
}
