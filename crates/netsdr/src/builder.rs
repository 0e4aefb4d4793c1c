//! NetSdrClientBuilder -- fluent builder for constructing [`NetSdrClient`]
//! instances.
//!
//! Separates configuration from construction: the builder resolves ports,
//! timeouts, and the sample rate, creates the socket channels, and hands
//! back a disconnected client. Call
//! [`NetSdrClient::connect`](crate::client::NetSdrClient::connect) to open
//! the session.
//!
//! # Example
//!
//! ```no_run
//! use netsdr::NetSdrClientBuilder;
//!
//! # async fn example() -> netsdr_core::Result<()> {
//! let client = NetSdrClientBuilder::new()
//!     .host("192.168.1.50")
//!     .sample_rate(250_000)
//!     .build()?;
//! client.connect().await?;
//! client.change_frequency(14_010_000, 0).await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use netsdr_core::channel::{ControlChannel, DataChannel};
use netsdr_core::error::{Error, Result};
use netsdr_transport::{TcpControlChannel, UdpDataChannel};

use crate::client::{ClientOptions, DEFAULT_IQ_BUFFER, NetSdrClient};
use crate::protocol::{DEFAULT_SAMPLE_RATE, DEFAULT_TCP_PORT, DEFAULT_UDP_PORT};

/// Default TCP connection timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Fluent builder for [`NetSdrClient`].
///
/// Only the host is required:
///
/// ```ignore
/// let client = NetSdrClientBuilder::new().host("192.168.1.50").build()?;
/// ```
#[derive(Debug, Clone)]
pub struct NetSdrClientBuilder {
    host: Option<String>,
    tcp_port: u16,
    udp_port: u16,
    sample_rate: u32,
    connect_timeout: Duration,
    response_timeout: Option<Duration>,
    iq_buffer: usize,
}

impl NetSdrClientBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        NetSdrClientBuilder {
            host: None,
            tcp_port: DEFAULT_TCP_PORT,
            udp_port: DEFAULT_UDP_PORT,
            sample_rate: DEFAULT_SAMPLE_RATE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            response_timeout: None,
            iq_buffer: DEFAULT_IQ_BUFFER,
        }
    }

    /// Set the receiver's IP address or hostname.
    pub fn host(mut self, host: &str) -> Self {
        self.host = Some(host.to_string());
        self
    }

    /// Set the receiver's TCP control port (default: 50000).
    pub fn tcp_port(mut self, port: u16) -> Self {
        self.tcp_port = port;
        self
    }

    /// Set the local UDP port IQ data arrives on (default: 60000).
    pub fn udp_port(mut self, port: u16) -> Self {
        self.udp_port = port;
        self
    }

    /// Set the IQ output sample rate sent during setup (default: 100000).
    pub fn sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = rate;
        self
    }

    /// Set the TCP connection timeout (default: 5s).
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Bound how long a control request waits for its response.
    ///
    /// By default requests wait indefinitely, matching the receiver's
    /// strictly sequential request/response exchange. With a timeout set,
    /// an expired request fails with [`Error::Timeout`]; a response that
    /// arrives afterwards is taken as the answer to the next request.
    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = Some(timeout);
        self
    }

    /// Set how many IQ frames may queue for each subscriber (default: 256).
    pub fn iq_buffer(mut self, frames: usize) -> Self {
        self.iq_buffer = frames;
        self
    }

    /// Build a client over TCP and UDP sockets.
    ///
    /// Requires that [`host()`](Self::host) has been called. No socket is
    /// opened until the client connects.
    pub fn build(self) -> Result<NetSdrClient> {
        let host = self.host.as_ref().ok_or_else(|| {
            Error::InvalidParameter("host is required: call .host() before .build()".into())
        })?;

        let control = TcpControlChannel::new(format!("{}:{}", host, self.tcp_port))
            .with_connect_timeout(self.connect_timeout);
        let data = UdpDataChannel::new(self.udp_port);

        tracing::debug!(
            addr = %control.addr(),
            udp_port = self.udp_port,
            "Building NetSDR client"
        );

        Ok(self.build_with_channels(Box::new(control), Box::new(data)))
    }

    /// Build a client over caller-supplied channels.
    ///
    /// This is the primary entry point for testing: pass mock channels from
    /// `netsdr-test-harness`, or any other [`ControlChannel`] and
    /// [`DataChannel`] implementation. The host and port settings are
    /// ignored.
    pub fn build_with_channels(
        self,
        control: Box<dyn ControlChannel>,
        data: Box<dyn DataChannel>,
    ) -> NetSdrClient {
        NetSdrClient::new(control, data, self.options())
    }

    fn options(&self) -> ClientOptions {
        ClientOptions {
            sample_rate: self.sample_rate,
            response_timeout: self.response_timeout,
            iq_buffer: self.iq_buffer,
        }
    }
}

impl Default for NetSdrClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
