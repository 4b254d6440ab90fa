//! Context Navigator
//!
//! The board's console is a menu, not a flat command set: per-unit commands are
//! only accepted inside the matching menu. Moving between two non-main menus
//! always goes through `main`, so the firmware never sees a direct
//! controller -> compensator hop.

use crate::error::{AppResult, TcbError};
use crate::hardware::transport::Transport;
use crate::tcb::codec::{RESET, RETURN_TO_MAIN};
use crate::tcb::retry::RetryCoordinator;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Menu the board's console is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MenuContext {
    /// Top-level menu; telemetry and reset are only accepted here
    Main,
    /// Controller menu
    Controller,
    /// Compensator menu
    Compensator,
}

impl MenuContext {
    /// Token that enters this menu from `main`. `main` itself has none.
    pub fn entry_token(self) -> Option<&'static str> {
        match self {
            MenuContext::Main => None,
            MenuContext::Controller => Some("controller"),
            MenuContext::Compensator => Some("compensator"),
        }
    }
}

impl fmt::Display for MenuContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MenuContext::Main => "main",
            MenuContext::Controller => "controller",
            MenuContext::Compensator => "compensator",
        };
        write!(f, "{}", label)
    }
}

impl FromStr for MenuContext {
    type Err = TcbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "main" => Ok(MenuContext::Main),
            "controller" => Ok(MenuContext::Controller),
            "compensator" => Ok(MenuContext::Compensator),
            _ => Err(TcbError::InvalidContext(s.to_string())),
        }
    }
}

/// One token's worth of menu movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavStep {
    /// Leave the current menu with `m`
    ReturnToMain,
    /// Enter a menu from `main`
    Enter(MenuContext),
}

impl NavStep {
    /// Token that performs this step.
    pub fn token(self) -> &'static str {
        match self {
            NavStep::ReturnToMain => RETURN_TO_MAIN,
            NavStep::Enter(context) => context.entry_token().unwrap_or(RETURN_TO_MAIN),
        }
    }

    /// Menu the board is in after this step.
    pub fn destination(self) -> MenuContext {
        match self {
            NavStep::ReturnToMain => MenuContext::Main,
            NavStep::Enter(context) => context,
        }
    }
}

/// Steps needed to get from `from` to `to`.
pub fn transition(from: MenuContext, to: MenuContext) -> Vec<NavStep> {
    use MenuContext::*;
    match (from, to) {
        (Main, Main) => vec![],
        (Controller | Compensator, Main) => vec![NavStep::ReturnToMain],
        (Main, target) => vec![NavStep::Enter(target)],
        (Controller | Compensator, target) => {
            vec![NavStep::ReturnToMain, NavStep::Enter(target)]
        }
    }
}

/// Tracks which menu the board is in and walks it to the one a command needs.
#[derive(Debug, Clone)]
pub struct ContextNavigator {
    current: MenuContext,
}

impl ContextNavigator {
    /// The board boots into `main`.
    pub fn new() -> Self {
        Self {
            current: MenuContext::Main,
        }
    }

    /// Menu the board is believed to be in.
    pub fn current(&self) -> MenuContext {
        self.current
    }

    /// Walk the board to `target`, sending each navigation token unchecked.
    pub fn change<T: Transport>(
        &mut self,
        target: MenuContext,
        link: &mut RetryCoordinator<T>,
    ) -> AppResult<()> {
        for step in transition(self.current, target) {
            debug!(from = %self.current, to = %step.destination(), "Changing menu context");
            link.send(step.token(), None)?;
            self.current = step.destination();
        }
        Ok(())
    }

    /// Track the menu movement caused by a token sent outside the navigator.
    ///
    /// `m` and `bounce` land in `main` from anywhere; a menu name only moves
    /// the board when it is sent from `main`. Anything else leaves the menu as is.
    pub fn observe(&mut self, token: &str) {
        let next = match (self.current, token.trim()) {
            (_, RETURN_TO_MAIN | RESET) => MenuContext::Main,
            (MenuContext::Main, name) => match name.parse::<MenuContext>() {
                Ok(target) if target.entry_token().is_some() => target,
                _ => return,
            },
            _ => return,
        };
        if next != self.current {
            debug!(from = %self.current, to = %next, token, "Raw token changed menu context");
            self.current = next;
        }
    }

    /// Record that the board dropped back to `main` on its own (after a reboot).
    pub fn assume_main(&mut self) {
        self.current = MenuContext::Main;
    }
}

impl Default for ContextNavigator {
    fn default() -> Self {
        Self::new()
    }
}
