//! Robot mode as reported by the dashboard `robotmode` query.

use serde::Serialize;

/// Prefix of every `robotmode` reply.
pub const MODE_REPLY_PREFIX: &str = "Robotmode: ";

/// The controller's self-reported operating state.
///
/// Only the modes the session waits on are named. Everything else the
/// controller may report (`CONFIRM_SAFETY`, `BACKDRIVE`, ...) is kept
/// verbatim in [`RobotMode::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(into = "String")]
pub enum RobotMode {
    PowerOff,
    Booting,
    Idle,
    Running,
    Other(String),
}

impl RobotMode {
    /// Parse a dashboard reply line.
    ///
    /// A known mode is recognised only for the exact form
    /// `Robotmode: <MODE>`; any deviation (extra whitespace, lower case,
    /// missing prefix) yields `Other`.
    pub fn parse_reply(reply: &str) -> Self {
        let Some(mode) = reply.strip_prefix(MODE_REPLY_PREFIX) else {
            return RobotMode::Other(reply.to_string());
        };

        match mode {
            "POWER_OFF" => RobotMode::PowerOff,
            "BOOTING" => RobotMode::Booting,
            "IDLE" => RobotMode::Idle,
            "RUNNING" => RobotMode::Running,
            other => RobotMode::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            RobotMode::PowerOff => "POWER_OFF",
            RobotMode::Booting => "BOOTING",
            RobotMode::Idle => "IDLE",
            RobotMode::Running => "RUNNING",
            RobotMode::Other(raw) => raw,
        }
    }

    /// The reply line a controller sends for this mode.
    pub fn to_reply(&self) -> String {
        format!("{}{}", MODE_REPLY_PREFIX, self.as_str())
    }
}

impl std::fmt::Display for RobotMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<RobotMode> for String {
    fn from(mode: RobotMode) -> Self {
        mode.as_str().to_string()
    }
}
