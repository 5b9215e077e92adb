//! Line-framed TCP transport shared by the dashboard and script channels.

use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::debug;

use crate::error::{ChannelKind, Result, SessionError};

/// Longest line accepted from the controller, terminator included.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// A connected TCP socket with a buffered line reader.
///
/// Replies are decoded as ASCII; any stray non-ASCII byte is replaced
/// rather than rejected.
pub struct LineChannel {
    kind: ChannelKind,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    io_timeout: Option<Duration>,
}

impl LineChannel {
    /// Open a connection to `address`. There is no retry: a refused or
    /// unreachable endpoint fails immediately.
    pub async fn connect(
        kind: ChannelKind,
        address: &str,
        connect_timeout: Duration,
        io_timeout: Option<Duration>,
    ) -> Result<Self> {
        let connect_err = |source: io::Error| SessionError::Connect {
            channel: kind,
            address: address.to_string(),
            source,
        };

        let stream = with_timeout(Some(connect_timeout), TcpStream::connect(address))
            .await
            .map_err(connect_err)?;
        stream.set_nodelay(true).map_err(connect_err)?;
        debug!("Connected {} channel to {}", kind, address);

        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            kind,
            reader: BufReader::new(read_half),
            writer: write_half,
            io_timeout,
        })
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Write `bytes` and flush them to the socket.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        let writer = &mut self.writer;
        with_timeout(self.io_timeout, async move {
            writer.write_all(bytes).await?;
            writer.flush().await
        })
        .await
        .map_err(|source| SessionError::Write {
            channel: self.kind,
            source,
        })
    }

    /// Read one line with its terminator stripped.
    ///
    /// Returns `Ok(None)` when the peer closed the connection cleanly
    /// before sending anything. A line longer than [`MAX_LINE_LEN`] is a
    /// `Read` error.
    pub async fn read_line(&mut self) -> Result<Option<String>> {
        let mut buf = Vec::new();
        let mut limited = (&mut self.reader).take(MAX_LINE_LEN as u64);
        let read = with_timeout(self.io_timeout, limited.read_until(b'\n', &mut buf))
            .await
            .map_err(|source| SessionError::Read {
                channel: self.kind,
                source,
            })?;

        if read == 0 {
            return Ok(None);
        }
        if read == MAX_LINE_LEN && !buf.ends_with(b"\n") {
            return Err(SessionError::Read {
                channel: self.kind,
                source: io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("line exceeds {} bytes", MAX_LINE_LEN),
                ),
            });
        }
        Ok(Some(decode_line(&buf)))
    }

    /// Shut the connection down. Errors are ignored: the peer may already
    /// be gone.
    pub async fn close(mut self) {
        let _ = self.writer.shutdown().await;
        debug!("Closed {} channel", self.kind);
    }
}

fn decode_line(buf: &[u8]) -> String {
    let line = buf.strip_suffix(b"\n").unwrap_or(buf);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

async fn with_timeout<T>(
    timeout: Option<Duration>,
    fut: impl Future<Output = io::Result<T>>,
) -> io::Result<T> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
            io::Error::new(
                io::ErrorKind::TimedOut,
                format!("no progress within {:?}", limit),
            )
        })?,
        None => fut.await,
    }
}
