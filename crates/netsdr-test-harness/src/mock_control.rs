//! Mock control channel for deterministic client tests.
//!
//! [`MockControlChannel`] implements [`ControlChannel`] without a socket.
//! By default every sent frame is echoed straight back as its response, so
//! a request/response exchange completes immediately. Scripted responses
//! can be queued instead, or auto-replies switched off so the test injects
//! inbound frames itself.
//!
//! The channel is moved into the client as a `Box<dyn ControlChannel>`, so
//! inspection happens through the paired [`MockControlHandle`].
//!
//! # Example
//!
//! ```
//! use netsdr_test_harness::MockControlChannel;
//!
//! let (channel, handle) = MockControlChannel::new();
//! // ... hand `channel` to the client, then:
//! assert_eq!(handle.connect_calls(), 0);
//! assert!(handle.sent_frames().is_empty());
//! # drop(channel);
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;

use netsdr_core::channel::{ControlChannel, FrameSink};
use netsdr_core::error::{Error, Result};

#[derive(Debug, Default)]
struct ControlState {
    connected: bool,
    connect_calls: usize,
    disconnect_calls: usize,
    sent: Vec<Bytes>,
    sink: Option<FrameSink>,
    echo: bool,
    refuse_connect: bool,
    scripted: VecDeque<Bytes>,
}

/// A mock [`ControlChannel`] that records every call.
#[derive(Debug)]
pub struct MockControlChannel {
    state: Arc<Mutex<ControlState>>,
}

/// Inspection and scripting handle for a [`MockControlChannel`].
#[derive(Debug, Clone)]
pub struct MockControlHandle {
    state: Arc<Mutex<ControlState>>,
}

fn lock(state: &Mutex<ControlState>) -> MutexGuard<'_, ControlState> {
    // A panicking test thread must not hide the recorded calls.
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockControlChannel {
    /// Create a channel that echoes every sent frame back as its response.
    pub fn new() -> (Self, MockControlHandle) {
        Self::with_echo(true)
    }

    /// Create a channel that never answers on its own.
    ///
    /// Responses must be delivered with [`MockControlHandle::inject`].
    pub fn silent() -> (Self, MockControlHandle) {
        Self::with_echo(false)
    }

    fn with_echo(echo: bool) -> (Self, MockControlHandle) {
        let state = Arc::new(Mutex::new(ControlState {
            echo,
            ..ControlState::default()
        }));
        (
            MockControlChannel {
                state: Arc::clone(&state),
            },
            MockControlHandle { state },
        )
    }
}

impl MockControlHandle {
    /// Number of times `connect` was called.
    pub fn connect_calls(&self) -> usize {
        lock(&self.state).connect_calls
    }

    /// Number of times `disconnect` was called.
    pub fn disconnect_calls(&self) -> usize {
        lock(&self.state).disconnect_calls
    }

    /// Every frame passed to `send_frame`, in order.
    pub fn sent_frames(&self) -> Vec<Bytes> {
        lock(&self.state).sent.clone()
    }

    /// Number of frames sent so far.
    pub fn send_count(&self) -> usize {
        lock(&self.state).sent.len()
    }

    /// Whether the mock considers itself connected.
    pub fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }

    /// Make subsequent `connect` calls fail with a transport error.
    pub fn refuse_connect(&self, refuse: bool) {
        lock(&self.state).refuse_connect = refuse;
    }

    /// Enable or disable echoing sent frames back as responses.
    pub fn set_echo(&self, echo: bool) {
        lock(&self.state).echo = echo;
    }

    /// Queue a response for the next sent frame, taking precedence over echo.
    pub fn queue_response(&self, frame: &[u8]) {
        lock(&self.state)
            .scripted
            .push_back(Bytes::copy_from_slice(frame));
    }

    /// Deliver an inbound frame as if the receiver had sent it.
    ///
    /// Returns `false` if the channel is not connected.
    pub async fn inject(&self, frame: &[u8]) -> bool {
        let sink = lock(&self.state).sink.clone();
        match sink {
            Some(sink) => sink.send(Bytes::copy_from_slice(frame)).await.is_ok(),
            None => false,
        }
    }

    /// Drop the inbound sink as if the remote end had closed the connection.
    pub fn sever(&self) {
        let mut state = lock(&self.state);
        state.sink = None;
        state.connected = false;
    }
}

#[async_trait]
impl ControlChannel for MockControlChannel {
    async fn connect(&mut self, sink: FrameSink) -> Result<()> {
        let mut state = lock(&self.state);
        state.connect_calls += 1;
        if state.refuse_connect {
            return Err(Error::Transport("mock connect refused".into()));
        }
        state.connected = true;
        state.sink = Some(sink);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        state.disconnect_calls += 1;
        state.connected = false;
        state.sink = None;
        Ok(())
    }

    async fn send_frame(&mut self, frame: &[u8]) -> Result<()> {
        let (reply, sink) = {
            let mut state = lock(&self.state);
            if !state.connected {
                return Err(Error::NotConnected);
            }
            let frame = Bytes::copy_from_slice(frame);
            state.sent.push(frame.clone());
            let reply = match state.scripted.pop_front() {
                Some(scripted) => Some(scripted),
                None if state.echo => Some(frame),
                None => None,
            };
            (reply, state.sink.clone())
        };

        if let (Some(reply), Some(sink)) = (reply, sink) {
            // The receiver may already be gone during teardown.
            let _ = sink.send(reply).await;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }
}
