//! The robot control session: one dashboard client, one script channel.
//!
//! Power-on and brake release are two-step operations on the controller.
//! The command returns immediately and the robot reports progress only
//! through its mode, so the session polls `robotmode` in a background task
//! and hands the caller a [`ModeWait`]. Polls take the dashboard lock for
//! one query at a time, which keeps `stop` and `emergency_stop` responsive
//! while a wait is outstanding.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::SessionConfig;
use crate::dashboard::{DashboardClient, StopReply};
use crate::error::{ChannelKind, Result, SessionError};
use crate::events::{EventKind, EventSink, SessionEvent};
use crate::mode::RobotMode;
use crate::motion::MotionChannel;

/// Script sent on the motion channel by [`RobotSession::emergency_stop`]:
/// decelerate all joints at 2 rad/s².
pub const EMERGENCY_DECEL_PROGRAM: &str = "stopj(2)";

/// How long [`RobotSession::emergency_stop`] waits for the dashboard's
/// `stop` reply before decelerating anyway. Independent of the configured
/// I/O timeout.
pub const EMERGENCY_STOP_REPLY_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// Exactly one of the two channels is open, e.g. after a failed connect.
    Partial,
    Connected,
}

/// Handle to a background mode wait started by
/// [`RobotSession::power_on`] or [`RobotSession::brake_release`].
///
/// Dropping the handle leaves the wait running until it completes, times
/// out, or the session disconnects.
#[derive(Debug)]
pub struct ModeWait {
    target: RobotMode,
    cancel: CancellationToken,
    task: JoinHandle<Result<RobotMode>>,
}

impl ModeWait {
    pub fn target(&self) -> &RobotMode {
        &self.target
    }

    /// Ask the poll to stop. A query already on the wire is completed first
    /// so the dashboard channel stays in sync.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the poll to finish.
    pub async fn wait(self) -> Result<RobotMode> {
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(SessionError::WaitCancelled {
                target: self.target,
            }),
        }
    }
}

#[derive(Clone)]
pub struct RobotSession {
    inner: Arc<Inner>,
}

struct Inner {
    config: SessionConfig,
    dashboard: DashboardClient,
    motion: MotionChannel,
    /// Parent of every poll's token; replaced on each disconnect.
    cancel: Mutex<CancellationToken>,
    events: EventSink,
}

impl RobotSession {
    pub fn new(config: SessionConfig) -> Self {
        let dashboard = DashboardClient::new(
            config.endpoint.dashboard_address(),
            config.connect_timeout(),
            config.io_timeout(),
        );
        let motion = MotionChannel::new(
            config.endpoint.script_address(),
            config.connect_timeout(),
            config.io_timeout(),
        );

        Self {
            inner: Arc::new(Inner {
                config,
                dashboard,
                motion,
                cancel: Mutex::new(CancellationToken::new()),
                events: EventSink::new(),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn dashboard(&self) -> &DashboardClient {
        &self.inner.dashboard
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    pub fn connection_state(&self) -> ConnectionState {
        match (
            self.inner.dashboard.is_connected(),
            self.inner.motion.is_connected(),
        ) {
            (true, true) => ConnectionState::Connected,
            (false, false) => ConnectionState::Disconnected,
            _ => ConnectionState::Partial,
        }
    }

    /// Open the dashboard channel, then the script channel.
    ///
    /// A channel that is already open is kept, so calling this again after
    /// a partial failure only opens what is missing.
    #[instrument(skip(self), fields(host = %self.inner.config.endpoint.host))]
    pub async fn connect(&self) -> Result<()> {
        let result = async {
            self.inner.dashboard.connect().await?;
            self.inner.motion.connect().await
        }
        .await;

        match &result {
            Ok(()) => {
                info!("Robot session connected");
                self.inner.events.emit(EventKind::Connected {
                    dashboard: self.inner.dashboard.address().to_string(),
                    script: self.inner.motion.address().to_string(),
                });
            }
            Err(e) => {
                warn!("Robot connection failed: {}", e);
                self.inner.events.emit(EventKind::ConnectFailed {
                    error: error_chain(e),
                });
            }
        }
        result
    }

    /// Cancel outstanding mode waits and close both channels.
    #[instrument(skip(self))]
    pub async fn disconnect(&self) {
        let was_open = self.connection_state() != ConnectionState::Disconnected;

        {
            let mut cancel = self
                .inner
                .cancel
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            cancel.cancel();
            *cancel = CancellationToken::new();
        }

        self.inner.dashboard.close().await;
        self.inner.motion.close().await;

        if was_open {
            info!("Robot session disconnected");
            self.inner.events.emit(EventKind::Disconnected);
        }
    }

    /// Power the arm up and wait in the background for `IDLE`.
    #[instrument(skip(self))]
    pub async fn power_on(&self) -> Result<ModeWait> {
        let result = self.inner.dashboard.power_on().await;
        self.report("PowerOn", result)?;
        self.inner.events.emit(EventKind::PowerOnRequested);
        Ok(self.spawn_wait(RobotMode::Idle))
    }

    /// Release the brakes and wait in the background for `RUNNING`.
    #[instrument(skip(self))]
    pub async fn brake_release(&self) -> Result<ModeWait> {
        let result = self.inner.dashboard.brake_release().await;
        self.report("BrakeRelease", result)?;
        self.inner.events.emit(EventKind::BrakeReleaseRequested);
        Ok(self.spawn_wait(RobotMode::Running))
    }

    /// Poll the robot mode until it equals `target`, in the background.
    pub fn spawn_wait(&self, target: RobotMode) -> ModeWait {
        let cancel = self
            .inner
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .child_token();

        let session = self.clone();
        let token = cancel.clone();
        let poll_target = target.clone();
        let task = tokio::spawn(async move {
            let result = session.poll_mode(&poll_target, &token).await;
            match &result {
                Ok(mode) => session
                    .inner
                    .events
                    .emit(EventKind::ModeReached { mode: mode.clone() }),
                Err(e) => session.inner.events.emit(EventKind::WaitFailed {
                    target: poll_target.clone(),
                    error: error_chain(e),
                }),
            }
            result
        });

        ModeWait {
            target,
            cancel,
            task,
        }
    }

    async fn poll_mode(&self, target: &RobotMode, cancel: &CancellationToken) -> Result<RobotMode> {
        let interval = self.inner.config.poll_interval();
        let started = Instant::now();
        let deadline = self.inner.config.max_wait().map(|limit| started + limit);
        debug!("Waiting for robot mode {}", target);

        loop {
            if cancel.is_cancelled() {
                return Err(SessionError::WaitCancelled {
                    target: target.clone(),
                });
            }

            let mode = match self.inner.dashboard.query_mode().await {
                Ok(mode) => mode,
                // Disconnect closed the channel under us.
                Err(_) if cancel.is_cancelled() => {
                    return Err(SessionError::WaitCancelled {
                        target: target.clone(),
                    });
                }
                Err(e) => return Err(e),
            };
            if &mode == target {
                info!("Robot reached mode {}", mode);
                return Ok(mode);
            }
            debug!("Robot mode is {}, waiting for {}", mode, target);

            let pause = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(SessionError::WaitTimeout {
                            target: target.clone(),
                            waited: now - started,
                            last: mode,
                        });
                    }
                    interval.min(deadline - now)
                }
                None => interval,
            };

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(SessionError::WaitCancelled { target: target.clone() });
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }

    /// Stream a program to the script interpreter.
    #[instrument(skip(self, program), fields(bytes = program.len()))]
    pub async fn send_program(&self, program: &str) -> Result<()> {
        let result = self.send_program_inner(program, None).await;
        self.report("SendProgram", result)
    }

    /// Read a script file and stream it to the interpreter.
    #[instrument(skip(self, path), fields(path = %path.display()))]
    pub async fn send_program_from_file(&self, path: &Path) -> Result<()> {
        let result = async {
            let mut program = tokio::fs::read_to_string(path).await.map_err(|source| {
                SessionError::ProgramSource {
                    path: path.to_path_buf(),
                    source,
                }
            })?;
            program.push('\n');
            self.send_program_inner(&program, Some(path.display().to_string()))
                .await
        }
        .await;
        self.report("RunProgram", result)
    }

    async fn send_program_inner(&self, program: &str, source: Option<String>) -> Result<()> {
        if !self.inner.dashboard.is_connected() {
            return Err(SessionError::NotConnected {
                channel: ChannelKind::Dashboard,
            });
        }
        self.inner.motion.send_program(program).await?;
        self.inner.events.emit(EventKind::ProgramSent {
            bytes: program.len(),
            source,
        });
        Ok(())
    }

    /// Stop the running program and return the controller's reply.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<StopReply> {
        let reply = self.report("Stop", self.inner.dashboard.stop().await)?;
        info!("Stop reply: {}", reply);
        self.inner.events.emit(EventKind::Stopped {
            reply: reply.clone(),
        });
        Ok(reply)
    }

    /// Stop the program through the dashboard, then decelerate the arm
    /// through the script channel.
    ///
    /// The deceleration is attempted whatever happened on the dashboard.
    /// The `stop` reply is awaited for at most
    /// [`EMERGENCY_STOP_REPLY_TIMEOUT`]; a missing, late or unreadable
    /// reply is only logged and leaves the dashboard disconnected. A dashboard
    /// failure that kept `stop` from being sent is returned after the
    /// deceleration; a failed deceleration write takes precedence.
    #[instrument(skip(self))]
    pub async fn emergency_stop(&self) -> Result<()> {
        let dashboard_error = match self
            .inner
            .dashboard
            .stop_within(EMERGENCY_STOP_REPLY_TIMEOUT)
            .await
        {
            Ok(StopReply::Reply(reply)) => {
                debug!("Emergency stop dashboard reply: {}", reply);
                None
            }
            Ok(StopReply::NoReply) => {
                warn!("Emergency stop: no dashboard reply to stop");
                None
            }
            Err(e @ (SessionError::Read { .. } | SessionError::Closed { .. })) => {
                warn!("Emergency stop: no dashboard reply: {}", e);
                None
            }
            Err(e) => {
                warn!("Emergency stop: dashboard stop failed: {}", e);
                Some(e)
            }
        };

        let decel = self
            .inner
            .motion
            .send_program(EMERGENCY_DECEL_PROGRAM)
            .await;
        if decel.is_ok() {
            warn!("Emergency stop issued");
            self.inner.events.emit(EventKind::EmergencyStop);
        }
        self.report("EmergencyStop", decel)?;

        match dashboard_error {
            Some(e) => self.report("EmergencyStop", Err(e)),
            None => Ok(()),
        }
    }

    /// One `robotmode` query.
    pub async fn robot_mode(&self) -> Result<RobotMode> {
        let result = self.inner.dashboard.query_mode().await;
        self.report("RobotMode", result)
    }

    /// Whether a program is executing. A session without a dashboard
    /// connection reports `false` instead of failing.
    pub async fn is_program_running(&self) -> Result<bool> {
        if !self.inner.dashboard.is_connected() {
            return Ok(false);
        }
        let result = self.inner.dashboard.query_program_running().await;
        self.report("ProgramRunning", result)
    }

    fn report<T>(&self, operation: &str, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.inner.events.emit(EventKind::OperationFailed {
                operation: operation.to_string(),
                error: error_chain(e),
            });
        }
        result
    }
}

/// Render an error with its sources, e.g.
/// `failed to connect dashboard channel to 10.0.0.2:29999: connection refused`.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
