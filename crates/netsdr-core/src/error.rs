//! Error types for the NetSDR client.
//!
//! All fallible operations across the workspace return [`Result<T>`], which
//! uses [`Error`] as the error type. Socket failures, frame construction
//! errors, and session-state violations are all captured here.
//!
//! Frame *parsing* is the one exception: a received frame that fails to parse
//! is not an error of the caller's making, so the codec reports it through
//! its own `ParseFailure` type together with whatever could be decoded.

/// The error type for all NetSDR client operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A transport-level error (TCP connect, UDP bind, socket write).
    #[error("transport error: {0}")]
    Transport(String),

    /// Timed out waiting for the receiver.
    ///
    /// Only produced when a response timeout has been configured; by
    /// default a control request waits for its response indefinitely.
    #[error("timeout waiting for response")]
    Timeout,

    /// An argument violated a protocol limit, e.g. a control-item frame
    /// whose total length would exceed 8191 bytes.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A numeric argument fell outside its permitted range.
    #[error("value out of range: {0}")]
    OutOfRange(String),

    /// No connection to the receiver has been established.
    #[error("not connected")]
    NotConnected,

    /// The connection to the receiver was lost while a request was pending.
    #[error("connection lost")]
    ConnectionLost,

    /// A control request is already awaiting its response.
    ///
    /// The control channel is half-duplex: exactly one request may be in
    /// flight at a time.
    #[error("a control request is already in flight")]
    RequestInFlight,

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
