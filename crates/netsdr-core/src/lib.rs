//! netsdr-core: Core traits, wire primitives, and error definitions for the
//! NetSDR client.
//!
//! This crate defines the pieces shared by the protocol crate and the
//! transports without pulling in either.
//!
//! # Key types
//!
//! - [`ControlChannel`] / [`DataChannel`] -- channel capabilities
//! - [`frame`] -- the 16-bit header layout and length-field sentinel
//! - [`ClientEvent`] -- session state notifications
//! - [`Error`] / [`Result`] -- error handling

pub mod channel;
pub mod error;
pub mod events;
pub mod frame;

pub use channel::{ControlChannel, DataChannel, FrameSink, FrameStream, frame_channel};
pub use error::{Error, Result};
pub use events::ClientEvent;
