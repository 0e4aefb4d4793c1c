//! TCP control channel.
//!
//! [`TcpControlChannel`] implements [`ControlChannel`] over a tokio
//! [`TcpStream`]. A background reader reassembles complete frames from the
//! byte stream using the 13-bit length field in each header (a length field
//! of `0` announces an 8194-byte frame) and forwards them, in order, to the
//! sink supplied at connect time.
//!
//! # Example
//!
//! ```no_run
//! use netsdr_core::channel::{ControlChannel, frame_channel};
//! use netsdr_transport::TcpControlChannel;
//!
//! # async fn example() -> netsdr_core::Result<()> {
//! let mut channel = TcpControlChannel::new("192.168.1.50:50000");
//! let (sink, mut frames) = frame_channel(16);
//! channel.connect(sink).await?;
//!
//! // SetControlItem ReceiverState: idle
//! channel.send_frame(&[0x08, 0x00, 0x18, 0x00, 0x00, 0x01, 0x00, 0x00]).await?;
//! let ack = frames.recv().await;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use netsdr_core::channel::{ControlChannel, FrameSink};
use netsdr_core::error::{Error, Result};
use netsdr_core::frame::{self, HEADER_LEN, MAX_FRAME_LEN};

/// Default connection timeout (5 seconds).
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// TCP implementation of [`ControlChannel`].
///
/// Created disconnected; the socket is opened by
/// [`connect`](ControlChannel::connect) and released by
/// [`disconnect`](ControlChannel::disconnect) or on drop.
#[derive(Debug)]
pub struct TcpControlChannel {
    /// `host:port` of the receiver.
    addr: String,
    connect_timeout: Duration,
    /// Write half, `None` while disconnected.
    writer: Option<OwnedWriteHalf>,
    /// Background frame reader, `None` while disconnected.
    reader: Option<ReaderTask>,
    /// Cleared by the reader when the peer closes the connection.
    connected: Arc<AtomicBool>,
}

#[derive(Debug)]
struct ReaderTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl TcpControlChannel {
    /// Create a channel for `addr` (`"host:port"`) using the default
    /// connection timeout.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            writer: None,
            reader: None,
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Set the connection timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// The address this channel connects to.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn stop_reader(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.cancel.cancel();
            let _ = reader.handle.await;
        }
    }
}

#[async_trait]
impl ControlChannel for TcpControlChannel {
    async fn connect(&mut self, sink: FrameSink) -> Result<()> {
        if self.is_connected() {
            tracing::debug!(addr = %self.addr, "Already connected, ignoring connect");
            return Ok(());
        }
        // A previous session may have ended from the remote side.
        self.stop_reader().await;
        self.writer = None;

        tracing::debug!(
            addr = %self.addr,
            timeout_ms = self.connect_timeout.as_millis(),
            "Connecting control channel"
        );

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| {
                tracing::error!(addr = %self.addr, "TCP connection timed out");
                Error::Timeout
            })?
            .map_err(|e| {
                tracing::error!(addr = %self.addr, error = %e, "TCP connection failed");
                Error::Transport(format!("failed to connect to {}: {}", self.addr, e))
            })?;

        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!(
                addr = %self.addr,
                error = %e,
                "Failed to set TCP_NODELAY (continuing anyway)"
            );
        }

        let (read_half, write_half) = stream.into_split();
        let cancel = CancellationToken::new();
        self.connected.store(true, Ordering::SeqCst);

        let handle = {
            let cancel = cancel.clone();
            let connected = Arc::clone(&self.connected);
            let addr = self.addr.clone();
            tokio::spawn(async move {
                read_loop(read_half, &sink, cancel, &addr).await;
                // Cleared before the sink drops so consumers that observe the
                // end of the stream also observe the disconnect.
                connected.store(false, Ordering::SeqCst);
                drop(sink);
            })
        };

        self.writer = Some(write_half);
        self.reader = Some(ReaderTask { cancel, handle });

        tracing::info!(addr = %self.addr, "Control channel connected");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.stop_reader().await;

        if let Some(mut writer) = self.writer.take() {
            tracing::debug!(addr = %self.addr, "Closing control channel");
            if let Err(e) = writer.shutdown().await {
                tracing::warn!(
                    addr = %self.addr,
                    error = %e,
                    "Error during TCP shutdown (connection closed anyway)"
                );
            }
            tracing::info!(addr = %self.addr, "Control channel closed");
        }

        Ok(())
    }

    async fn send_frame(&mut self, frame: &[u8]) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(Error::NotConnected);
        }
        let writer = self.writer.as_mut().ok_or(Error::NotConnected)?;

        tracing::trace!(addr = %self.addr, bytes = frame.len(), data = ?frame, "Sending frame");

        writer.write_all(frame).await.map_err(|e| {
            tracing::error!(addr = %self.addr, error = %e, "Failed to send frame");
            map_io_error(e)
        })?;
        writer.flush().await.map_err(|e| {
            tracing::error!(addr = %self.addr, error = %e, "Failed to flush TCP stream");
            map_io_error(e)
        })?;

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.writer.is_some() && self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for TcpControlChannel {
    fn drop(&mut self) {
        if let Some(reader) = &self.reader {
            reader.cancel.cancel();
        }
    }
}

/// Reader task: accumulate bytes and forward each complete frame.
async fn read_loop(
    mut reader: OwnedReadHalf,
    sink: &FrameSink,
    cancel: CancellationToken,
    addr: &str,
) {
    let mut buf = BytesMut::with_capacity(MAX_FRAME_LEN * 2);

    loop {
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            read = reader.read_buf(&mut buf) => read,
        };

        match read {
            Ok(0) => {
                tracing::warn!(addr = %addr, "Peer closed control connection");
                break;
            }
            Ok(n) => {
                tracing::trace!(addr = %addr, bytes = n, "Received data");
                while let Some(frame) = split_frame(&mut buf) {
                    if sink.send(frame).await.is_err() {
                        tracing::debug!(addr = %addr, "Frame consumer gone, stopping reader");
                        return;
                    }
                }
            }
            Err(e) => {
                tracing::error!(addr = %addr, error = %e, "Control channel read error");
                break;
            }
        }
    }
}

/// Remove one complete frame from the front of `buf`.
///
/// Returns `None` until enough bytes have arrived. A length field below the
/// header size cannot describe a real frame; the two header bytes are
/// emitted alone so the consumer sees the malformed frame and the stream
/// keeps moving.
pub(crate) fn split_frame(buf: &mut BytesMut) -> Option<Bytes> {
    let raw = frame::read_header(&buf[..])?;
    let (_, length_field) = frame::decode_header(raw);
    let need = frame::announced_len(length_field).max(HEADER_LEN);

    if buf.len() < need {
        return None;
    }
    Some(buf.split_to(need).freeze())
}

/// Map an I/O error from an established connection.
fn map_io_error(e: std::io::Error) -> Error {
    match e.kind() {
        std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::ConnectionAborted
        | std::io::ErrorKind::UnexpectedEof => Error::ConnectionLost,
        _ => Error::Io(e),
    }
}
