//! OS stop signals observed by the daemon.
//!
//! [`Signal`] names the small set of termination signals a daemon cares
//! about. Numbers follow POSIX; on Windows only [`Signal::Interrupt`] (Ctrl+C)
//! is deliverable.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::Error;

/// A process stop signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Signal {
    /// SIGHUP
    #[serde(rename = "SIGHUP")]
    Hangup,
    /// SIGINT, or Ctrl+C on Windows
    #[serde(rename = "SIGINT")]
    Interrupt,
    /// SIGQUIT
    #[serde(rename = "SIGQUIT")]
    Quit,
    /// SIGABRT
    #[serde(rename = "SIGABRT")]
    Abort,
    /// SIGTERM
    #[serde(rename = "SIGTERM")]
    Terminate,
}

impl Signal {
    /// Every signal this crate knows how to subscribe to.
    pub const ALL: [Self; 5] = [
        Self::Hangup,
        Self::Interrupt,
        Self::Quit,
        Self::Abort,
        Self::Terminate,
    ];

    /// POSIX signal number.
    #[must_use]
    pub const fn number(self) -> i32 {
        match self {
            Self::Hangup => 1,
            Self::Interrupt => 2,
            Self::Quit => 3,
            Self::Abort => 6,
            Self::Terminate => 15,
        }
    }

    /// Conventional upper-case name, e.g. `SIGTERM`.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Hangup => "SIGHUP",
            Self::Interrupt => "SIGINT",
            Self::Quit => "SIGQUIT",
            Self::Abort => "SIGABRT",
            Self::Terminate => "SIGTERM",
        }
    }

    /// Look up a signal by its POSIX number.
    #[must_use]
    pub fn from_number(number: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.number() == number)
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Signal {
    type Err = Error;

    /// Accepts `SIGTERM`, `sigterm`, `TERM` and `term`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let name = upper.strip_prefix("SIG").unwrap_or(&upper);
        Self::ALL
            .into_iter()
            .find(|sig| &sig.name()[3..] == name)
            .ok_or_else(|| Error::signal(format!("Unknown signal name: {s}")))
    }
}

/// Signals watched when none are configured explicitly.
#[must_use]
pub fn default_signals() -> Vec<Signal> {
    #[cfg(unix)]
    {
        vec![
            Signal::Interrupt,
            Signal::Quit,
            Signal::Abort,
            Signal::Terminate,
        ]
    }

    #[cfg(not(unix))]
    {
        vec![Signal::Interrupt]
    }
}

/// Helper function to get a human-readable description of a signal.
#[must_use]
pub const fn signal_description(signal: i32) -> &'static str {
    match signal {
        1 => "SIGHUP (Hangup)",
        2 => "SIGINT (Interrupt/Ctrl+C)",
        3 => "SIGQUIT (Quit)",
        6 => "SIGABRT (Abort)",
        9 => "SIGKILL (Kill - non-catchable)",
        15 => "SIGTERM (Terminate)",
        _ => "Unknown signal",
    }
}
