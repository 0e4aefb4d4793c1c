//! Channel capability traits consumed by the client state machine.
//!
//! The NetSDR protocol runs over two independent links:
//!
//! - a **control channel** ([`ControlChannel`]), an ordered, reliable byte
//!   stream carrying commands and acknowledgements (TCP in practice), and
//! - a **data channel** ([`DataChannel`]), a best-effort datagram stream
//!   carrying IQ samples (UDP in practice).
//!
//! Neither trait knows anything about frame contents. Received frames are
//! pushed into a [`FrameSink`] handed over by the consumer when the channel
//! is connected or started, which keeps delivery order explicit: the sink
//! sees frames in exactly the order the channel received them.
//!
//! Socket implementations live in `netsdr-transport`; mocks for unit tests
//! live in `netsdr-test-harness`.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::Result;

/// Destination for frames received by a channel.
///
/// Each message is one complete frame, header included.
pub type FrameSink = mpsc::Sender<Bytes>;

/// Receiving side of a [`FrameSink`].
pub type FrameStream = mpsc::Receiver<Bytes>;

/// Create a connected sink/stream pair with room for `capacity` frames.
pub fn frame_channel(capacity: usize) -> (FrameSink, FrameStream) {
    mpsc::channel(capacity)
}

/// Ordered, reliable command channel to the receiver.
///
/// Implementations must deliver frames into the sink in arrival order and
/// must never split or merge frames.
#[async_trait]
pub trait ControlChannel: Send + Sync {
    /// Open the connection and start delivering received frames to `sink`.
    ///
    /// A failed connect leaves the channel disconnected and the error is
    /// returned to the caller.
    async fn connect(&mut self, sink: FrameSink) -> Result<()>;

    /// Close the connection.
    ///
    /// Safe to call when already disconnected. After it returns no further
    /// frames are delivered to the sink.
    async fn disconnect(&mut self) -> Result<()>;

    /// Send one complete frame.
    ///
    /// Returns [`Error::NotConnected`](crate::error::Error::NotConnected)
    /// when the channel is not connected.
    async fn send_frame(&mut self, frame: &[u8]) -> Result<()>;

    /// Whether the underlying connection is currently open.
    fn is_connected(&self) -> bool;
}

/// Best-effort datagram channel carrying IQ sample frames.
#[async_trait]
pub trait DataChannel: Send + Sync {
    /// Begin the asynchronous receive loop, delivering datagrams to `sink`.
    ///
    /// Calling this while already receiving restarts the loop with the new
    /// sink; the previous loop is stopped first.
    async fn start_receiving(&mut self, sink: FrameSink) -> Result<()>;

    /// Stop the receive loop.
    ///
    /// Safe to call when not receiving. Once this returns the previous sink
    /// receives no further frames.
    async fn stop_receiving(&mut self) -> Result<()>;

    /// Whether the receive loop is currently running.
    fn is_receiving(&self) -> bool;
}
