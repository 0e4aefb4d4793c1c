//! UDP data channel.
//!
//! [`UdpDataChannel`] implements [`DataChannel`]: each
//! [`start_receiving`](DataChannel::start_receiving) binds a fresh socket on
//! the configured port and spawns a receive loop that forwards every
//! datagram, unmodified, to the supplied sink. Datagrams that arrive while
//! the consumer is behind are dropped rather than queued without bound.
//!
//! # Example
//!
//! ```no_run
//! use netsdr_core::channel::{DataChannel, frame_channel};
//! use netsdr_transport::UdpDataChannel;
//!
//! # async fn example() -> netsdr_core::Result<()> {
//! let mut channel = UdpDataChannel::new(60000);
//! let (sink, mut datagrams) = frame_channel(256);
//! channel.start_receiving(sink).await?;
//! while let Some(datagram) = datagrams.recv().await {
//!     println!("{} bytes of IQ", datagram.len());
//! }
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use netsdr_core::channel::{DataChannel, FrameSink};
use netsdr_core::error::{Error, Result};
use netsdr_core::frame::MAX_FRAME_LEN;

/// UDP implementation of [`DataChannel`].
#[derive(Debug)]
pub struct UdpDataChannel {
    /// Address each receive loop binds to.
    bind_addr: String,
    /// Address of the socket currently bound, if receiving.
    local_addr: Option<SocketAddr>,
    receiver: Option<ReceiverTask>,
}

#[derive(Debug)]
struct ReceiverTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl UdpDataChannel {
    /// Create a channel that listens on `port` on all interfaces.
    pub fn new(port: u16) -> Self {
        Self::bind_to(format!("0.0.0.0:{}", port))
    }

    /// Create a channel that listens on an explicit `host:port`.
    ///
    /// Use port `0` to let the OS pick; the chosen address is available
    /// from [`local_addr`](Self::local_addr) once receiving.
    pub fn bind_to(addr: impl Into<String>) -> Self {
        Self {
            bind_addr: addr.into(),
            local_addr: None,
            receiver: None,
        }
    }

    /// The address the receive socket is bound to, while receiving.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

#[async_trait]
impl DataChannel for UdpDataChannel {
    async fn start_receiving(&mut self, sink: FrameSink) -> Result<()> {
        // Only one receive loop at a time; a restart replaces the sink.
        self.stop_receiving().await?;

        tracing::debug!(addr = %self.bind_addr, "Binding UDP data socket");
        let socket = UdpSocket::bind(&self.bind_addr).await.map_err(|e| {
            tracing::error!(addr = %self.bind_addr, error = %e, "Failed to bind UDP socket");
            Error::Transport(format!("failed to bind {}: {}", self.bind_addr, e))
        })?;
        let local_addr = socket.local_addr().map_err(|e| {
            tracing::error!(error = %e, "Failed to get local address");
            Error::Io(e)
        })?;

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(receive_loop(socket, sink, cancel.clone(), local_addr));

        self.local_addr = Some(local_addr);
        self.receiver = Some(ReceiverTask { cancel, handle });

        tracing::info!(local_addr = %local_addr, "Data channel receiving");
        Ok(())
    }

    async fn stop_receiving(&mut self) -> Result<()> {
        if let Some(receiver) = self.receiver.take() {
            receiver.cancel.cancel();
            let _ = receiver.handle.await;
            tracing::info!(
                local_addr = ?self.local_addr,
                "Data channel stopped"
            );
        }
        self.local_addr = None;
        Ok(())
    }

    fn is_receiving(&self) -> bool {
        self.receiver
            .as_ref()
            .is_some_and(|receiver| !receiver.handle.is_finished())
    }
}

impl Drop for UdpDataChannel {
    fn drop(&mut self) {
        if let Some(receiver) = &self.receiver {
            receiver.cancel.cancel();
        }
    }
}

async fn receive_loop(
    socket: UdpSocket,
    sink: FrameSink,
    cancel: CancellationToken,
    local_addr: SocketAddr,
) {
    let mut buf = vec![0u8; MAX_FRAME_LEN + 1024];
    let mut dropped: u64 = 0;

    loop {
        let received = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            received = socket.recv_from(&mut buf) => received,
        };

        match received {
            Ok((n, src)) => {
                tracing::trace!(local = %local_addr, remote = %src, bytes = n, "Received datagram");
                match sink.try_send(Bytes::copy_from_slice(&buf[..n])) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        dropped += 1;
                        if dropped.is_power_of_two() {
                            tracing::warn!(
                                local = %local_addr,
                                dropped,
                                "Data consumer is behind, dropping datagrams"
                            );
                        }
                    }
                    Err(TrySendError::Closed(_)) => {
                        tracing::debug!(local = %local_addr, "Datagram consumer gone");
                        break;
                    }
                }
            }
            Err(e) => {
                // ICMP port-unreachable and similar transient errors are
                // reported here on some platforms; keep listening.
                tracing::warn!(local = %local_addr, error = %e, "UDP receive error");
            }
        }
    }

    tracing::debug!(local = %local_addr, dropped, "Receive loop exiting");
}
