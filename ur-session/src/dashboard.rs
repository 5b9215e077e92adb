//! Client for the controller's dashboard server.
//!
//! The dashboard protocol is strictly one reply line per command line with
//! no request identifiers, so replies are matched to commands purely by
//! order. Every exchange therefore runs under a single lock covering both
//! the write and the read, and a channel that failed mid-exchange is
//! dropped rather than reused.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::channel::LineChannel;
use crate::error::{ChannelKind, Result, SessionError};
use crate::mode::RobotMode;

pub const CMD_POWER_ON: &str = "power on";
pub const CMD_BRAKE_RELEASE: &str = "brake release";
pub const CMD_STOP: &str = "stop";
pub const CMD_ROBOT_MODE: &str = "robotmode";
pub const CMD_RUNNING: &str = "running";

/// The only reply to `running` that means a program is executing.
pub const PROGRAM_RUNNING_REPLY: &str = "Program running: true";

/// Reply to a dashboard `stop`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReply {
    Reply(String),
    /// The controller hung up, or did not answer in time.
    NoReply,
}

impl std::fmt::Display for StopReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReply::Reply(text) => f.write_str(text),
            StopReply::NoReply => f.write_str("(no reply)"),
        }
    }
}

impl From<Option<String>> for StopReply {
    fn from(reply: Option<String>) -> Self {
        match reply {
            Some(reply) => StopReply::Reply(reply),
            None => StopReply::NoReply,
        }
    }
}

pub struct DashboardClient {
    address: String,
    connect_timeout: Duration,
    io_timeout: Option<Duration>,
    channel: Mutex<Option<LineChannel>>,
    connected: AtomicBool,
}

impl DashboardClient {
    pub fn new(address: String, connect_timeout: Duration, io_timeout: Option<Duration>) -> Self {
        Self {
            address,
            connect_timeout,
            io_timeout,
            channel: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Open the connection and consume the welcome banner.
    ///
    /// Does nothing when already connected.
    pub async fn connect(&self) -> Result<()> {
        let mut guard = self.channel.lock().await;
        if guard.is_some() {
            debug!("Dashboard already connected to {}", self.address);
            return Ok(());
        }

        let mut channel = LineChannel::connect(
            ChannelKind::Dashboard,
            &self.address,
            self.connect_timeout,
            self.io_timeout,
        )
        .await?;

        let banner_err = |source: std::io::Error| SessionError::Connect {
            channel: ChannelKind::Dashboard,
            address: self.address.clone(),
            source,
        };
        match channel.read_line().await {
            Ok(Some(banner)) => debug!("Dashboard banner: {}", banner),
            Ok(None) => {
                return Err(banner_err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "controller closed the connection before sending its banner",
                )));
            }
            Err(SessionError::Read { source, .. }) => return Err(banner_err(source)),
            Err(e) => return Err(e),
        }

        *guard = Some(channel);
        self.connected.store(true, Ordering::Release);
        info!("Dashboard connected to {}", self.address);
        Ok(())
    }

    /// Send one command and read its single reply line.
    ///
    /// Returns `Ok(None)` when the controller closed the connection instead
    /// of replying. The channel is discarded after any transport failure or
    /// hang-up, so later calls fail with `NotConnected`.
    pub async fn send_command(&self, command: &str) -> Result<Option<String>> {
        self.exchange(command, None).await
    }

    /// One command/reply exchange. With `reply_limit`, a reply that has not
    /// arrived in time counts as no reply and the channel is retired, since
    /// the late line would otherwise answer the next command.
    async fn exchange(
        &self,
        command: &str,
        reply_limit: Option<Duration>,
    ) -> Result<Option<String>> {
        let mut guard = self.channel.lock().await;
        let channel = guard.as_mut().ok_or(SessionError::NotConnected {
            channel: ChannelKind::Dashboard,
        })?;

        let mut line = command.to_string();
        if !line.ends_with('\n') {
            line.push('\n');
        }

        debug!("dashboard > {}", command.trim_end());
        let reply = match channel.send_raw(line.as_bytes()).await {
            Ok(()) => match reply_limit {
                Some(limit) => tokio::time::timeout(limit, channel.read_line())
                    .await
                    .ok(),
                None => Some(channel.read_line().await),
            },
            Err(e) => Some(Err(e)),
        };
        let Some(reply) = reply else {
            warn!(
                "No dashboard reply to '{}' in time, closing channel",
                command.trim_end()
            );
            self.discard(&mut guard).await;
            return Ok(None);
        };

        match reply {
            Ok(Some(reply)) => {
                debug!("dashboard < {}", reply);
                Ok(Some(reply))
            }
            Ok(None) => {
                warn!("Dashboard closed by controller after '{}'", command.trim_end());
                self.discard(&mut guard).await;
                Ok(None)
            }
            Err(e) => {
                warn!("Dashboard exchange '{}' failed: {}", command.trim_end(), e);
                self.discard(&mut guard).await;
                Err(e)
            }
        }
    }

    /// Like [`send_command`](Self::send_command), but a hang-up is an error.
    async fn request(&self, command: &str) -> Result<String> {
        self.send_command(command)
            .await?
            .ok_or(SessionError::Closed {
                channel: ChannelKind::Dashboard,
            })
    }

    /// Raw `robotmode` reply, e.g. `Robotmode: IDLE`.
    pub async fn query_mode_raw(&self) -> Result<String> {
        self.request(CMD_ROBOT_MODE).await
    }

    pub async fn query_mode(&self) -> Result<RobotMode> {
        Ok(RobotMode::parse_reply(&self.query_mode_raw().await?))
    }

    pub async fn query_program_running(&self) -> Result<bool> {
        Ok(self.request(CMD_RUNNING).await? == PROGRAM_RUNNING_REPLY)
    }

    /// Request power-up. The reply is discarded; completion is only visible
    /// through the robot mode.
    pub async fn power_on(&self) -> Result<()> {
        self.send_command(CMD_POWER_ON).await.map(|_| ())
    }

    /// Request brake release. The reply is discarded.
    pub async fn brake_release(&self) -> Result<()> {
        self.send_command(CMD_BRAKE_RELEASE).await.map(|_| ())
    }

    pub async fn stop(&self) -> Result<StopReply> {
        Ok(self.exchange(CMD_STOP, None).await?.into())
    }

    /// Send `stop` but wait at most `reply_limit` for the answer.
    ///
    /// A late reply yields [`StopReply::NoReply`] and the channel is
    /// closed, so later commands fail with `NotConnected`.
    pub async fn stop_within(&self, reply_limit: Duration) -> Result<StopReply> {
        Ok(self.exchange(CMD_STOP, Some(reply_limit)).await?.into())
    }

    /// Close the connection. Safe to call any number of times.
    pub async fn close(&self) {
        let mut guard = self.channel.lock().await;
        self.discard(&mut guard).await;
    }

    async fn discard(&self, slot: &mut Option<LineChannel>) {
        self.connected.store(false, Ordering::Release);
        if let Some(channel) = slot.take() {
            channel.close().await;
        }
    }
}
