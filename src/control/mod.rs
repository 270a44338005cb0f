//! Session control: lifecycle, commands and published status
//!
//! A [`session::StimSession`] owns every piece of mutable engine state and is driven
//! by a single tokio task. Outside code talks to it only through
//! [`SessionHandle`]: commands go in over an mpsc channel, status comes out over a
//! watch channel.

pub mod error;
pub mod refresh;
pub mod session;
pub mod session_handle;

pub use error::SessionError;
pub use refresh::RefreshGate;
pub use session::{run_session, SessionIo, StimSession, StopReason};
pub use session_handle::SessionHandle;

use crate::intensity::IntensityReading;
use crate::tracker::ContextId;
use std::fmt::{self, Display};

/// Requests accepted by a running session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Start,
    Stop,
    Quit,
    SelectContext(ContextId),
}

/// Why the session sits in the error state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusFault {
    /// Configuration could not be loaded or validated
    Config(String),
    /// Device transport is required but not connected
    Transport,
    /// A rule or the state source failed while tracking
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramStatus {
    Ready,
    Running,
    Stopping,
    Error(StatusFault),
}

impl ProgramStatus {
    pub fn is_error(&self) -> bool {
        matches!(self, ProgramStatus::Error(_))
    }
}

impl Display for ProgramStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgramStatus::Ready => f.write_str("READY"),
            ProgramStatus::Running => f.write_str("RUNNING"),
            ProgramStatus::Stopping => f.write_str("STOPPING"),
            ProgramStatus::Error(StatusFault::Config(_)) => f.write_str("CONFIG ERROR"),
            ProgramStatus::Error(StatusFault::Transport) => f.write_str("TRANSPORT ERROR"),
            ProgramStatus::Error(StatusFault::Unknown(_)) => f.write_str("UNKNOWN ERROR"),
        }
    }
}

/// Snapshot of what a status surface shows
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    pub program_status: ProgramStatus,
    pub device_count: usize,
    pub intensity: IntensityReading,
    pub context: ContextId,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            program_status: ProgramStatus::Ready,
            device_count: 0,
            intensity: IntensityReading::default(),
            context: ContextId::default(),
        }
    }
}

impl Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | devices: {} | intensity: {} | hero: {}",
            self.program_status, self.device_count, self.intensity, self.context
        )
    }
}
