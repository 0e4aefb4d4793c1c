//! Mock data channel for IQ streaming tests.
//!
//! [`MockDataChannel`] implements [`DataChannel`] and counts start/stop
//! calls. Datagrams are fed in through [`MockDataHandle::deliver`], which
//! only reaches the consumer while the receive loop is "running".

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;

use netsdr_core::channel::{DataChannel, FrameSink};
use netsdr_core::error::{Error, Result};

#[derive(Debug, Default)]
struct DataState {
    start_calls: usize,
    stop_calls: usize,
    sink: Option<FrameSink>,
    refuse_start: bool,
}

/// A mock [`DataChannel`] that records every call.
#[derive(Debug)]
pub struct MockDataChannel {
    state: Arc<Mutex<DataState>>,
}

/// Inspection and injection handle for a [`MockDataChannel`].
#[derive(Debug, Clone)]
pub struct MockDataHandle {
    state: Arc<Mutex<DataState>>,
}

fn lock(state: &Mutex<DataState>) -> MutexGuard<'_, DataState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockDataChannel {
    /// Create a stopped mock data channel and its handle.
    pub fn new() -> (Self, MockDataHandle) {
        let state = Arc::new(Mutex::new(DataState::default()));
        (
            MockDataChannel {
                state: Arc::clone(&state),
            },
            MockDataHandle { state },
        )
    }
}

impl MockDataHandle {
    /// Number of times `start_receiving` was called.
    pub fn start_calls(&self) -> usize {
        lock(&self.state).start_calls
    }

    /// Number of times `stop_receiving` was called.
    pub fn stop_calls(&self) -> usize {
        lock(&self.state).stop_calls
    }

    /// Whether the receive loop is running.
    pub fn is_receiving(&self) -> bool {
        lock(&self.state).sink.is_some()
    }

    /// Make subsequent `start_receiving` calls fail.
    pub fn refuse_start(&self, refuse: bool) {
        lock(&self.state).refuse_start = refuse;
    }

    /// Deliver a datagram to the consumer.
    ///
    /// Returns `false` when the receive loop is stopped and the datagram
    /// was discarded.
    pub async fn deliver(&self, datagram: &[u8]) -> bool {
        let sink = lock(&self.state).sink.clone();
        match sink {
            Some(sink) => sink.send(Bytes::copy_from_slice(datagram)).await.is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl DataChannel for MockDataChannel {
    async fn start_receiving(&mut self, sink: FrameSink) -> Result<()> {
        let mut state = lock(&self.state);
        state.start_calls += 1;
        if state.refuse_start {
            // Like a socket channel, a restart stops the previous loop first.
            state.sink = None;
            return Err(Error::Transport("mock bind refused".into()));
        }
        state.sink = Some(sink);
        Ok(())
    }

    async fn stop_receiving(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        state.stop_calls += 1;
        state.sink = None;
        Ok(())
    }

    fn is_receiving(&self) -> bool {
        lock(&self.state).sink.is_some()
    }
}
