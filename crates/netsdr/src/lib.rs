//! NetSDR protocol client.
//!
//! This crate talks to RFSpace-style NetSDR receivers. It provides:
//!
//! - **Message codec** ([`codec`]) -- build and parse control-item and
//!   data-item frames, including the zero-length sentinel for 8194-byte
//!   frames, and unpack fixed-width samples from a frame body.
//! - **Protocol constants** ([`protocol`]) -- message types, control item
//!   codes, default ports, and the fixed parameter blocks the client sends.
//! - **NetSdrClient** ([`client`]) -- the session state machine: setup on
//!   connect, one-at-a-time request/response on the control channel, and
//!   the IQ stream lifecycle.
//! - **NetSdrClientBuilder** ([`builder`]) -- fluent builder wiring the
//!   client to TCP/UDP sockets or to caller-supplied channels.
//!
//! # Architecture
//!
//! The receiver uses a split transport:
//! - **TCP** (port 50000) for control items and their acknowledgements
//! - **UDP** (port 60000) for IQ data items
//!
//! The client only sees these through the
//! [`ControlChannel`](netsdr_core::ControlChannel) and
//! [`DataChannel`](netsdr_core::DataChannel) traits, so the state machine
//! is tested against mocks without opening sockets.
//!
//! # Example
//!
//! ```no_run
//! use netsdr::{NetSdrClientBuilder, protocol::IQ_SAMPLE_BITS};
//!
//! # async fn example() -> netsdr::Result<()> {
//! let client = NetSdrClientBuilder::new().host("192.168.1.50").build()?;
//! let mut iq = client.subscribe_iq();
//!
//! client.connect().await?;
//! client.change_frequency(7_074_000, 0).await?;
//! client.start_iq().await?;
//!
//! while let Ok(frame) = iq.recv().await {
//!     let samples: Vec<u32> = frame.samples(IQ_SAMPLE_BITS)?.collect();
//!     println!("#{} {} samples", frame.sequence, samples.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod client;
pub mod codec;
pub mod protocol;

pub use builder::NetSdrClientBuilder;
pub use client::{ClientOptions, IqFrame, NetSdrClient, SessionState};
pub use codec::{Frame, ParseFailure};
pub use netsdr_core::{ClientEvent, Error, Result};
pub use protocol::{ControlItemCode, MessageType};
