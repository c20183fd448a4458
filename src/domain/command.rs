//! Typed drive commands.

use std::fmt;

/// A drive command, consumed exactly once by the controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// Run, forward or reverse.
    Start {
        /// Run in reverse.
        reverse: bool,
    },
    /// Stop.
    Stop,
    /// Clear / no-function control word.
    Reset,
    /// Jog, forward or reverse.
    Jog {
        /// Jog in reverse.
        reverse: bool,
    },
    /// Set the frequency command in Hz (clamped to the envelope).
    SetFrequency {
        /// Requested frequency.
        hz: f64,
    },
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start { reverse: false } => write!(f, "start forward"),
            Self::Start { reverse: true } => write!(f, "start reverse"),
            Self::Stop => write!(f, "stop"),
            Self::Reset => write!(f, "reset"),
            Self::Jog { reverse: false } => write!(f, "jog forward"),
            Self::Jog { reverse: true } => write!(f, "jog reverse"),
            Self::SetFrequency { hz } => write!(f, "set frequency {hz:.2} Hz"),
        }
    }
}
