//! Client lifecycle events.
//!
//! Events are emitted by the client through a [`tokio::sync::broadcast`]
//! channel when the session changes state. Delivery is best-effort; slow
//! subscribers may miss events.

/// An event emitted by the client when its session state changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// The control channel connected and the setup sequence completed.
    Connected,

    /// The control channel was disconnected.
    Disconnected,

    /// IQ streaming was started (or restarted) on the data channel.
    IqStarted,

    /// IQ streaming was stopped.
    IqStopped,

    /// A control frame arrived while no request was waiting for it.
    UnsolicitedFrame {
        /// Length of the dropped frame in bytes.
        len: usize,
    },
}
