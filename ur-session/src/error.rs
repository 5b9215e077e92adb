use miette::Diagnostic;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::mode::RobotMode;

/// Which of the two controller connections an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Dashboard,
    Script,
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelKind::Dashboard => write!(f, "dashboard"),
            ChannelKind::Script => write!(f, "script"),
        }
    }
}

/// Coarse classification of [`SessionError`], for callers that only care
/// whether a failure came from connecting, from an exchange, or from a wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connection,
    Protocol,
    Io,
    Timeout,
    Cancelled,
}

#[derive(Error, Diagnostic, Debug)]
pub enum SessionError {
    #[error("failed to connect {channel} channel to {address}")]
    #[diagnostic(
        code(ur_session::connect),
        help("check that the controller is reachable and remote control is enabled")
    )]
    Connect {
        channel: ChannelKind,
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{channel} channel is not connected")]
    #[diagnostic(code(ur_session::not_connected))]
    NotConnected { channel: ChannelKind },

    #[error("failed to write to {channel} channel")]
    #[diagnostic(code(ur_session::write))]
    Write {
        channel: ChannelKind,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read from {channel} channel")]
    #[diagnostic(code(ur_session::read))]
    Read {
        channel: ChannelKind,
        #[source]
        source: std::io::Error,
    },

    #[error("{channel} channel was closed by the controller")]
    #[diagnostic(code(ur_session::closed))]
    Closed { channel: ChannelKind },

    #[error("robot did not reach {target} within {waited:?} (last mode: {last})")]
    #[diagnostic(code(ur_session::wait_timeout))]
    WaitTimeout {
        target: RobotMode,
        waited: Duration,
        last: RobotMode,
    },

    #[error("wait for robot mode {target} was cancelled")]
    #[diagnostic(code(ur_session::wait_cancelled))]
    WaitCancelled { target: RobotMode },

    #[error("failed to read program from {}", .path.display())]
    #[diagnostic(code(ur_session::program_source))]
    ProgramSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::Connect { .. } => ErrorKind::Connection,
            SessionError::NotConnected { .. }
            | SessionError::Write { .. }
            | SessionError::Read { .. }
            | SessionError::Closed { .. } => ErrorKind::Protocol,
            SessionError::ProgramSource { .. } => ErrorKind::Io,
            SessionError::WaitTimeout { .. } => ErrorKind::Timeout,
            SessionError::WaitCancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// True when the channel can no longer be trusted: the socket failed
    /// or the peer hung up mid-conversation.
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            SessionError::Write { .. } | SessionError::Read { .. } | SessionError::Closed { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
