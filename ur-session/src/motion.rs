//! One-way script channel.
//!
//! Whatever is written here goes straight into the controller's script
//! interpreter. There is no handshake and nothing is read back, so a
//! successful send only means the bytes reached the socket.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::channel::LineChannel;
use crate::error::{ChannelKind, Result, SessionError};

pub struct MotionChannel {
    address: String,
    connect_timeout: Duration,
    io_timeout: Option<Duration>,
    channel: Mutex<Option<LineChannel>>,
    connected: AtomicBool,
}

impl MotionChannel {
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

    /// Open the connection. Does nothing when already connected.
    pub async fn connect(&self) -> Result<()> {
        let mut guard = self.channel.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let channel = LineChannel::connect(
            ChannelKind::Script,
            &self.address,
            self.connect_timeout,
            self.io_timeout,
        )
        .await?;
        *guard = Some(channel);
        self.connected.store(true, Ordering::Release);
        info!("Script channel connected to {}", self.address);
        Ok(())
    }

    /// Write a program, newline-terminated.
    pub async fn send_program(&self, program: &str) -> Result<()> {
        let mut guard = self.channel.lock().await;
        let channel = guard.as_mut().ok_or(SessionError::NotConnected {
            channel: ChannelKind::Script,
        })?;

        let mut payload = program.to_string();
        if !payload.ends_with('\n') {
            payload.push('\n');
        }

        match channel.send_raw(payload.as_bytes()).await {
            Ok(()) => {
                debug!("Sent {} bytes on script channel", payload.len());
                Ok(())
            }
            Err(e) => {
                warn!("Script channel write failed: {}", e);
                self.connected.store(false, Ordering::Release);
                if let Some(channel) = guard.take() {
                    channel.close().await;
                }
                Err(e)
            }
        }
    }

    /// Close the connection. Safe to call any number of times.
    pub async fn close(&self) {
        let mut guard = self.channel.lock().await;
        self.connected.store(false, Ordering::Release);
        if let Some(channel) = guard.take() {
            channel.close().await;
        }
    }
}
