//! Control session for Universal Robots controllers.
//!
//! A [`RobotSession`] holds two TCP connections to the controller:
//! - the dashboard server (port 29999), a line-based command/reply protocol
//!   used for power, brakes, stop and status queries;
//! - the script server (port 30002), which executes whatever program text
//!   is written to it.
//!
//! Authentication and any user interface are left to the caller.

pub mod channel;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod events;
pub mod mode;
pub mod motion;
pub mod session;

pub use channel::LineChannel;
pub use config::{Endpoint, SessionConfig};
pub use dashboard::{DashboardClient, StopReply};
pub use error::{ChannelKind, ErrorKind, Result, SessionError};
pub use events::{EventKind, EventSink, SessionEvent};
pub use mode::RobotMode;
pub use motion::MotionChannel;
pub use session::{
    ConnectionState, EMERGENCY_DECEL_PROGRAM, EMERGENCY_STOP_REPLY_TIMEOUT, ModeWait, RobotSession,
};
