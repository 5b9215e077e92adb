//! Operation outcomes published by a [`RobotSession`](crate::RobotSession).
//!
//! Every event carries a local timestamp and renders as a single
//! human-readable log line.

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::dashboard::StopReply;
use crate::mode::RobotMode;

/// Number of events a slow subscriber may fall behind before it starts
/// missing them.
pub const EVENT_CAPACITY: usize = 64;

const TIMESTAMP_FORMAT: &str = "%d-%m-%y %H.%M.%S";

#[derive(Debug, Clone, Serialize)]
pub struct SessionEvent {
    pub timestamp: DateTime<Local>,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    Connected { dashboard: String, script: String },
    ConnectFailed { error: String },
    Disconnected,
    PowerOnRequested,
    BrakeReleaseRequested,
    ModeReached { mode: RobotMode },
    WaitFailed { target: RobotMode, error: String },
    ProgramSent { bytes: usize, source: Option<String> },
    Stopped { reply: StopReply },
    EmergencyStop,
    OperationFailed { operation: String, error: String },
}

impl SessionEvent {
    pub fn now(kind: EventKind) -> Self {
        Self {
            timestamp: Local::now(),
            kind,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self.kind,
            EventKind::ConnectFailed { .. }
                | EventKind::WaitFailed { .. }
                | EventKind::OperationFailed { .. }
        )
    }
}

impl std::fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} | {}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.kind
        )
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Connected { dashboard, script } => {
                write!(f, "Robot connected (dashboard {dashboard}, script {script})")
            }
            EventKind::ConnectFailed { error } => write!(f, "Robot connection error: {error}"),
            EventKind::Disconnected => write!(f, "Robot disconnected"),
            EventKind::PowerOnRequested => write!(f, "Robot: power on"),
            EventKind::BrakeReleaseRequested => write!(f, "Robot: brake release"),
            EventKind::ModeReached { mode } => write!(f, "Robot mode reached: {mode}"),
            EventKind::WaitFailed { target, error } => {
                write!(f, "Waiting for {target} failed: {error}")
            }
            EventKind::ProgramSent {
                bytes,
                source: Some(source),
            } => write!(f, "Robot: {source} sent ({bytes} bytes)"),
            EventKind::ProgramSent {
                bytes,
                source: None,
            } => write!(f, "Robot: program sent ({bytes} bytes)"),
            EventKind::Stopped { reply } => write!(f, "Robot STOP. Reply: {reply}"),
            EventKind::EmergencyStop => write!(f, "!!! EMERGENCY STOP !!!"),
            EventKind::OperationFailed { operation, error } => {
                write!(f, "{operation} error: {error}")
            }
        }
    }
}

/// Fan-out of session events. Publishing never blocks and never fails;
/// events are simply dropped when nobody listens.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventSink {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, kind: EventKind) {
        let _ = self.tx.send(SessionEvent::now(kind));
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new()
    }
}
