//! Session configuration.
//!
//! All types deserialize from YAML with every field optional, falling back
//! to the defaults of a factory-configured controller.

use miette::{IntoDiagnostic, Result, WrapErr};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_HOST: &str = "172.20.254.204";
pub const DEFAULT_DASHBOARD_PORT: u16 = 29999;
pub const DEFAULT_SCRIPT_PORT: u16 = 30002;

/// Where the controller listens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoint {
    pub host: String,
    pub dashboard_port: u16,
    pub script_port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, dashboard_port: u16, script_port: u16) -> Self {
        Self {
            host: host.into(),
            dashboard_port,
            script_port,
        }
    }

    pub fn dashboard_address(&self) -> String {
        format!("{}:{}", self.host, self.dashboard_port)
    }

    pub fn script_address(&self) -> String {
        format!("{}:{}", self.host, self.script_port)
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_DASHBOARD_PORT, DEFAULT_SCRIPT_PORT)
    }
}

/// Timing and endpoint settings for a [`RobotSession`](crate::RobotSession).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub endpoint: Endpoint,
    /// Delay between two `robotmode` queries while waiting on a mode
    pub poll_interval_ms: u64,
    /// Upper bound on a mode wait; `None` waits until success or disconnect
    pub max_wait_secs: Option<u64>,
    pub connect_timeout_secs: u64,
    /// Bound on a single write or reply read; `None` blocks indefinitely
    pub io_timeout_secs: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            poll_interval_ms: 1000,
            max_wait_secs: Some(60),
            connect_timeout_secs: 5,
            io_timeout_secs: Some(10),
        }
    }
}

impl SessionConfig {
    pub fn with_endpoint(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            ..Default::default()
        }
    }

    /// Load a configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .into_diagnostic()
            .wrap_err_with(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&contents).wrap_err_with(|| format!("Invalid config in {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents).into_diagnostic()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_wait(&self) -> Option<Duration> {
        self.max_wait_secs.map(Duration::from_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn io_timeout(&self) -> Option<Duration> {
        self.io_timeout_secs.map(Duration::from_secs)
    }
}
