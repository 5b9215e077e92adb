//! In-process stand-ins for the controller's dashboard and script servers.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use ur_session::{Endpoint, RobotSession, SessionConfig};

pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const BANNER: &str = "Connected: Universal Robots Dashboard Server";
pub const POLL_INTERVAL_MS: u64 = 10;

/// What the fake dashboard does with one received command.
#[derive(Debug, Clone)]
pub enum Reply {
    Line(String),
    /// Reply after holding the connection silent for a while.
    Delayed(Duration, String),
    /// Close the connection without replying.
    Hangup,
}

impl Reply {
    pub fn line(text: &str) -> Self {
        Reply::Line(text.to_string())
    }
}

/// One line crossing the fake dashboard's socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Wire {
    Received(String),
    Sent(String),
}

type Responder = Arc<dyn Fn(&str) -> Reply + Send + Sync>;

pub struct FakeDashboard {
    pub address: SocketAddr,
    transcript: Arc<Mutex<Vec<Wire>>>,
    task: JoinHandle<()>,
}

impl FakeDashboard {
    pub async fn start<F>(responder: F) -> Self
    where
        F: Fn(&str) -> Reply + Send + Sync + 'static,
    {
        Self::start_with_banner(Some(BANNER), responder).await
    }

    /// Start a server that greets with `banner`, or hangs up immediately
    /// when `banner` is `None`.
    pub async fn start_with_banner<F>(banner: Option<&str>, responder: F) -> Self
    where
        F: Fn(&str) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let transcript = Arc::new(Mutex::new(Vec::new()));
        let responder: Responder = Arc::new(responder);
        let banner = banner.map(str::to_string);

        let log = transcript.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve_dashboard(
                    stream,
                    banner.clone(),
                    responder.clone(),
                    log.clone(),
                ));
            }
        });

        Self {
            address,
            transcript,
            task,
        }
    }

    pub fn transcript(&self) -> Vec<Wire> {
        self.transcript.lock().unwrap().clone()
    }

    /// Every command line received so far, in order.
    pub fn received(&self) -> Vec<String> {
        self.transcript()
            .into_iter()
            .filter_map(|wire| match wire {
                Wire::Received(line) => Some(line),
                Wire::Sent(_) => None,
            })
            .collect()
    }

    pub fn count(&self, command: &str) -> usize {
        self.received().iter().filter(|c| *c == command).count()
    }
}

impl Drop for FakeDashboard {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_dashboard(
    stream: TcpStream,
    banner: Option<String>,
    responder: Responder,
    transcript: Arc<Mutex<Vec<Wire>>>,
) {
    let (read_half, mut write_half) = stream.into_split();
    let Some(banner) = banner else {
        return;
    };
    // Sent lines are recorded before writing so the transcript is complete
    // by the time the client has read them.
    transcript.lock().unwrap().push(Wire::Sent(banner.clone()));
    if write_half
        .write_all(format!("{banner}\n").as_bytes())
        .await
        .is_err()
    {
        return;
    }

    let mut lines = BufReader::new(read_half).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        transcript.lock().unwrap().push(Wire::Received(line.clone()));

        let text = match responder(&line) {
            Reply::Line(text) => text,
            Reply::Delayed(delay, text) => {
                tokio::time::sleep(delay).await;
                text
            }
            Reply::Hangup => return,
        };
        transcript.lock().unwrap().push(Wire::Sent(text.clone()));
        if write_half
            .write_all(format!("{text}\n").as_bytes())
            .await
            .is_err()
        {
            return;
        }
    }
}

/// Script server that records every byte it receives.
pub struct FakeScript {
    pub address: SocketAddr,
    received: Arc<Mutex<Vec<u8>>>,
    task: JoinHandle<()>,
}

impl FakeScript {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));

        let sink = received.clone();
        let task = tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let sink = sink.clone();
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    while let Ok(n) = stream.read(&mut buf).await {
                        if n == 0 {
                            break;
                        }
                        sink.lock().unwrap().extend_from_slice(&buf[..n]);
                    }
                });
            }
        });

        Self {
            address,
            received,
            task,
        }
    }

    pub fn received(&self) -> String {
        String::from_utf8_lossy(&self.received.lock().unwrap()).into_owned()
    }

    /// Wait until the received text contains `needle`.
    pub async fn wait_for(&self, needle: &str) -> bool {
        wait_until(Duration::from_secs(5), || self.received().contains(needle)).await
    }
}

impl Drop for FakeScript {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A port nothing listens on.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

pub fn test_config(dashboard_port: u16, script_port: u16) -> SessionConfig {
    SessionConfig {
        endpoint: Endpoint::new("127.0.0.1", dashboard_port, script_port),
        poll_interval_ms: POLL_INTERVAL_MS,
        max_wait_secs: Some(5),
        connect_timeout_secs: 2,
        io_timeout_secs: Some(5),
    }
}

pub fn session_for(dashboard: &FakeDashboard, script: &FakeScript) -> RobotSession {
    RobotSession::new(test_config(dashboard.address.port(), script.address.port()))
}

pub async fn connected_session(dashboard: &FakeDashboard, script: &FakeScript) -> RobotSession {
    let session = session_for(dashboard, script);
    session.connect().await.expect("connect to fake controller");
    session
}

/// Replies `robotmode` queries from `modes` in order, repeating the last
/// one once the list is exhausted. Any other command gets `default`.
pub fn mode_sequence(
    modes: &[&str],
    default: &str,
) -> impl Fn(&str) -> Reply + Send + Sync + use<> {
    let queue: Mutex<VecDeque<String>> =
        Mutex::new(modes.iter().map(|m| format!("Robotmode: {m}")).collect());
    let default = default.to_string();
    move |command| {
        if command != "robotmode" {
            return Reply::Line(default.clone());
        }
        let mut queue = queue.lock().unwrap();
        let reply = if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue.front().cloned().unwrap_or_default()
        };
        Reply::Line(reply)
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
