//! Socket channels for the NetSDR client.
//!
//! This crate provides the concrete implementations of the channel traits
//! from `netsdr-core`:
//!
//! - [`TcpControlChannel`]: the request/response control connection
//!   (receiver port 50000 by default)
//! - [`UdpDataChannel`]: the inbound IQ datagram stream (local port 60000
//!   by default)
//!
//! # Example
//!
//! ```no_run
//! use netsdr_core::channel::{ControlChannel, frame_channel};
//! use netsdr_transport::TcpControlChannel;
//!
//! # async fn example() -> netsdr_core::Result<()> {
//! let mut control = TcpControlChannel::new("192.168.1.50:50000");
//! let (sink, mut frames) = frame_channel(16);
//! control.connect(sink).await?;
//! while let Some(frame) = frames.recv().await {
//!     println!("{:02X?}", &frame[..]);
//! }
//! # Ok(())
//! # }
//! ```

pub mod tcp;
pub mod udp;

pub use tcp::TcpControlChannel;
pub use udp::UdpDataChannel;
