//! NetSDR client state machine.
//!
//! [`NetSdrClient`] owns one control channel and one data channel and drives
//! the session on top of them: the connection setup sequence, frequency
//! changes, and the IQ stream lifecycle.
//!
//! The control channel is half-duplex. Each request occupies a single
//! pending slot until the next inbound control frame arrives, and that frame
//! is taken as the response regardless of its contents. A second request
//! issued while the slot is occupied fails with [`Error::RequestInFlight`].
//!
//! Control-channel connectivity and IQ streaming are independent:
//! [`disconnect`](NetSdrClient::disconnect) does not stop a running stream.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{Mutex, broadcast, oneshot};
use tokio::task::JoinHandle;

use netsdr_core::channel::{ControlChannel, DataChannel, FrameStream, frame_channel};
use netsdr_core::error::{Error, Result};
use netsdr_core::events::ClientEvent;

use crate::codec::{self, Samples};
use crate::protocol::{self, ControlItemCode, MessageType};

/// Broadcast channel capacity for [`ClientEvent`] subscribers.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Default broadcast capacity for [`IqFrame`] subscribers.
pub const DEFAULT_IQ_BUFFER: usize = 256;

/// Inbound control frames buffered between the channel and the dispatcher.
const CONTROL_CHANNEL_CAPACITY: usize = 32;

/// Settings resolved by the builder and consumed by [`NetSdrClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// IQ output sample rate sent during the setup sequence.
    pub sample_rate: u32,
    /// How long a control request waits for its response.
    ///
    /// `None` (the default) waits indefinitely.
    pub response_timeout: Option<Duration>,
    /// Capacity of the IQ frame broadcast channel and of the datagram
    /// queue feeding it.
    pub iq_buffer: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            sample_rate: protocol::DEFAULT_SAMPLE_RATE,
            response_timeout: None,
            iq_buffer: DEFAULT_IQ_BUFFER,
        }
    }
}

/// Snapshot of the session flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionState {
    /// The control channel is connected and setup has been sent.
    pub connected: bool,
    /// The data channel's receive loop has been started.
    pub iq_started: bool,
}

/// A data-item frame received on the data channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IqFrame {
    /// Data-item sub-channel.
    pub msg_type: MessageType,
    /// Sequence number from the frame.
    pub sequence: u16,
    /// Raw sample bytes.
    pub body: Bytes,
}

impl IqFrame {
    /// Iterate the body as `sample_bits`-wide samples.
    ///
    /// The receiver's run mode selects 16-bit samples, see
    /// [`IQ_SAMPLE_BITS`](protocol::IQ_SAMPLE_BITS).
    pub fn samples(&self, sample_bits: u16) -> Result<Samples<'_>> {
        codec::decode_samples(sample_bits, &self.body)
    }
}

/// Single outstanding request slot shared with the dispatcher.
type PendingSlot = Arc<Mutex<Option<oneshot::Sender<Bytes>>>>;

/// Client for a NetSDR receiver.
///
/// Construct with [`NetSdrClientBuilder`](crate::builder::NetSdrClientBuilder)
/// or [`NetSdrClient::new`]. All methods take `&self`; the client can be
/// shared across tasks behind an `Arc`.
pub struct NetSdrClient {
    /// Control channel. Locked for connect, disconnect, and each send.
    control: Mutex<Box<dyn ControlChannel>>,

    /// Data channel. Locked for the whole of start/stop so the IQ flag and
    /// the receive loop change together.
    data: Mutex<Box<dyn DataChannel>>,

    /// Completion slot for the request awaiting its response.
    pending: PendingSlot,

    /// Event broadcast channel sender.
    event_tx: broadcast::Sender<ClientEvent>,

    /// IQ frame broadcast channel sender.
    iq_tx: broadcast::Sender<IqFrame>,

    /// Background task routing inbound control frames.
    control_task: Mutex<Option<JoinHandle<()>>>,

    /// Background task parsing inbound datagrams.
    iq_task: Mutex<Option<JoinHandle<()>>>,

    connected: Arc<AtomicBool>,
    iq_started: AtomicBool,

    options: ClientOptions,
}

impl NetSdrClient {
    /// Create a disconnected client over the given channels.
    pub fn new(
        control: Box<dyn ControlChannel>,
        data: Box<dyn DataChannel>,
        options: ClientOptions,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (iq_tx, _) = broadcast::channel(options.iq_buffer.max(1));

        Self {
            control: Mutex::new(control),
            data: Mutex::new(data),
            pending: Arc::new(Mutex::new(None)),
            event_tx,
            iq_tx,
            control_task: Mutex::new(None),
            iq_task: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            iq_started: AtomicBool::new(false),
            options,
        }
    }

    /// Connect the control channel and send the setup sequence.
    ///
    /// Does nothing if already connected. The setup sequence is the IQ
    /// sample rate, then automatic RF filter selection, then A/D dither and
    /// gain; each request waits for its response before the next is sent.
    ///
    /// A failed channel connect leaves the client disconnected. A failure
    /// part-way through setup leaves it connected with setup incomplete;
    /// call [`disconnect`](Self::disconnect) and retry.
    pub async fn connect(&self) -> Result<()> {
        {
            let mut control = self.control.lock().await;
            if self.connected.load(Ordering::SeqCst) {
                tracing::debug!("Already connected, ignoring connect");
                return Ok(());
            }

            tracing::debug!("Connecting control channel");
            let (sink, frames) = frame_channel(CONTROL_CHANNEL_CAPACITY);
            control.connect(sink).await?;

            // Anything left from an earlier session belongs to a dead channel.
            self.pending.lock().await.take();

            let handle = tokio::spawn(control_dispatch_loop(
                frames,
                Arc::clone(&self.pending),
                self.event_tx.clone(),
                Arc::clone(&self.connected),
            ));
            if let Some(previous) = self.control_task.lock().await.replace(handle) {
                previous.abort();
            }

            self.connected.store(true, Ordering::SeqCst);
        }

        self.set_control_item(
            ControlItemCode::IqOutputDataSampleRate,
            &protocol::sample_rate_params(self.options.sample_rate),
        )
        .await?;
        self.set_control_item(ControlItemCode::RfFilter, &protocol::RF_FILTER_AUTO)
            .await?;
        self.set_control_item(ControlItemCode::AdModes, &protocol::AD_MODES_DITHER_GAIN)
            .await?;

        tracing::info!(sample_rate = self.options.sample_rate, "NetSDR session ready");
        let _ = self.event_tx.send(ClientEvent::Connected);
        Ok(())
    }

    /// Disconnect the control channel.
    ///
    /// Always calls the channel's disconnect, even when already
    /// disconnected. A request awaiting its response fails with
    /// [`Error::ConnectionLost`]. IQ streaming is left running.
    pub async fn disconnect(&self) -> Result<()> {
        let mut control = self.control.lock().await;
        let was_connected = self.connected.swap(false, Ordering::SeqCst);

        tracing::debug!(was_connected, "Disconnecting control channel");
        let result = control.disconnect().await;
        drop(control);

        if let Some(handle) = self.control_task.lock().await.take() {
            handle.abort();
            let _ = handle.await;
        }
        self.pending.lock().await.take();

        if was_connected {
            let _ = self.event_tx.send(ClientEvent::Disconnected);
        }
        result
    }

    /// Tune `channel` to `frequency_hz`.
    ///
    /// Does nothing while disconnected. Frequencies above
    /// [`MAX_FREQUENCY_HZ`](protocol::MAX_FREQUENCY_HZ) do not fit the
    /// 40-bit field and are rejected with [`Error::InvalidParameter`].
    pub async fn change_frequency(&self, frequency_hz: u64, channel: u8) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            tracing::debug!(frequency_hz, "Not connected, ignoring frequency change");
            return Ok(());
        }
        if frequency_hz > protocol::MAX_FREQUENCY_HZ {
            return Err(Error::InvalidParameter(format!(
                "frequency {} Hz exceeds the 40-bit maximum {}",
                frequency_hz,
                protocol::MAX_FREQUENCY_HZ
            )));
        }

        tracing::debug!(frequency_hz, channel, "Changing frequency");
        self.set_control_item(
            ControlItemCode::ReceiverFrequency,
            &protocol::frequency_params(frequency_hz, channel),
        )
        .await
    }

    /// Put the receiver in run mode and start receiving IQ frames.
    ///
    /// Does nothing while disconnected. Calling it again while streaming
    /// re-arms the data channel with a fresh receive loop.
    pub async fn start_iq(&self) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            tracing::debug!("Not connected, ignoring IQ start");
            return Ok(());
        }

        self.set_control_item(ControlItemCode::ReceiverState, &protocol::RECEIVER_STATE_RUN)
            .await?;

        let mut data = self.data.lock().await;
        self.stop_iq_dispatch().await;

        let (sink, datagrams) = frame_channel(self.options.iq_buffer.max(1));
        if let Err(e) = data.start_receiving(sink).await {
            // A re-arm has already torn down the previous receive loop.
            let was_started = self.iq_started.swap(false, Ordering::SeqCst);
            drop(data);
            tracing::error!(error = %e, "Failed to start data channel");
            if was_started {
                let _ = self.event_tx.send(ClientEvent::IqStopped);
            }
            return Err(e);
        }

        let handle = tokio::spawn(iq_dispatch_loop(datagrams, self.iq_tx.clone()));
        *self.iq_task.lock().await = Some(handle);

        self.iq_started.store(true, Ordering::SeqCst);
        drop(data);

        tracing::info!("IQ streaming started");
        let _ = self.event_tx.send(ClientEvent::IqStarted);
        Ok(())
    }

    /// Stop receiving IQ frames and put the receiver back to idle.
    ///
    /// Does nothing if not streaming. Once this returns no further
    /// [`IqFrame`] is published. The idle command is only sent while the
    /// control channel is connected.
    pub async fn stop_iq(&self) -> Result<()> {
        let mut data = self.data.lock().await;
        if !self.iq_started.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let stopped = data.stop_receiving().await;
        self.stop_iq_dispatch().await;
        drop(data);

        tracing::info!("IQ streaming stopped");
        let _ = self.event_tx.send(ClientEvent::IqStopped);
        stopped?;

        if self.connected.load(Ordering::SeqCst) {
            self.set_control_item(ControlItemCode::ReceiverState, &protocol::RECEIVER_STATE_IDLE)
                .await?;
        }
        Ok(())
    }

    /// Send one raw frame on the control channel and await its response.
    ///
    /// The response is the next frame the receiver sends, whatever it
    /// contains.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] while disconnected
    /// - [`Error::RequestInFlight`] if another request is still waiting
    /// - [`Error::ConnectionLost`] if the channel closes before a response
    /// - [`Error::Timeout`] if a response timeout is configured and expires
    pub async fn send_request(&self, frame: &[u8]) -> Result<Bytes> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(Error::NotConnected);
        }

        let rx = {
            let mut slot = self.pending.lock().await;
            if slot.as_ref().is_some_and(|waiter| !waiter.is_closed()) {
                return Err(Error::RequestInFlight);
            }
            let (tx, rx) = oneshot::channel();
            *slot = Some(tx);
            rx
        };

        tracing::trace!(bytes = frame.len(), data = ?frame, "Sending request");
        let sent = self.control.lock().await.send_frame(frame).await;
        if let Err(e) = sent {
            self.pending.lock().await.take();
            return Err(e);
        }

        let response = match self.options.response_timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(received) => received,
                Err(_) => {
                    // Another request may already hold the slot once ours closed.
                    let mut slot = self.pending.lock().await;
                    if slot.as_ref().is_some_and(|waiter| waiter.is_closed()) {
                        slot.take();
                    }
                    drop(slot);
                    tracing::warn!(timeout_ms = limit.as_millis(), "Request timed out");
                    return Err(Error::Timeout);
                }
            },
            None => rx.await,
        };

        let response = response.map_err(|_| Error::ConnectionLost)?;
        tracing::trace!(bytes = response.len(), data = ?&response[..], "Response received");
        Ok(response)
    }

    /// Current session flags.
    pub fn state(&self) -> SessionState {
        SessionState {
            connected: self.is_connected(),
            iq_started: self.iq_started(),
        }
    }

    /// Whether the control session is up.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Whether IQ streaming is active.
    pub fn iq_started(&self) -> bool {
        self.iq_started.load(Ordering::SeqCst)
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.event_tx.subscribe()
    }

    /// Subscribe to received IQ frames.
    ///
    /// Subscribers that fall more than the configured IQ buffer behind
    /// miss frames and see [`broadcast::error::RecvError::Lagged`].
    pub fn subscribe_iq(&self) -> broadcast::Receiver<IqFrame> {
        self.iq_tx.subscribe()
    }

    /// The options this client was built with.
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    async fn set_control_item(&self, item_code: ControlItemCode, params: &[u8]) -> Result<()> {
        let frame =
            codec::build_control_item_frame(MessageType::SetControlItem, item_code, params)?;
        let response = self.send_request(&frame).await?;
        tracing::debug!(item = ?item_code, response_len = response.len(), "Control item set");
        Ok(())
    }

    async fn stop_iq_dispatch(&self) {
        if let Some(handle) = self.iq_task.lock().await.take() {
            handle.abort();
            let _ = handle.await;
        }
    }
}

impl Drop for NetSdrClient {
    fn drop(&mut self) {
        if let Some(handle) = self.control_task.get_mut().take() {
            handle.abort();
        }
        if let Some(handle) = self.iq_task.get_mut().take() {
            handle.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Background tasks
// ---------------------------------------------------------------------------

/// Hand each inbound control frame to the waiting request, if any.
async fn control_dispatch_loop(
    mut frames: FrameStream,
    pending: PendingSlot,
    event_tx: broadcast::Sender<ClientEvent>,
    connected: Arc<AtomicBool>,
) {
    while let Some(frame) = frames.recv().await {
        match codec::parse_frame(&frame) {
            Ok(parsed) => tracing::trace!(
                msg_type = ?parsed.msg_type,
                item = ?parsed.item_code,
                "Control frame received"
            ),
            Err(e) => tracing::debug!(error = %e, "Control frame did not parse cleanly"),
        }

        let waiter = pending.lock().await.take();
        let unclaimed = match waiter {
            Some(tx) => tx.send(frame).err(),
            None => Some(frame),
        };

        if let Some(frame) = unclaimed {
            tracing::warn!(bytes = frame.len(), "Dropping control frame with no request waiting");
            let _ = event_tx.send(ClientEvent::UnsolicitedFrame { len: frame.len() });
        }
    }

    // Dropping the sender fails the waiter with ConnectionLost.
    pending.lock().await.take();

    if connected.swap(false, Ordering::SeqCst) {
        tracing::warn!("Control channel closed by receiver");
        let _ = event_tx.send(ClientEvent::Disconnected);
    }
}

/// Parse inbound datagrams and publish the data-item frames.
async fn iq_dispatch_loop(mut datagrams: FrameStream, iq_tx: broadcast::Sender<IqFrame>) {
    let mut expected_sequence: Option<u16> = None;

    while let Some(datagram) = datagrams.recv().await {
        let frame = match codec::parse_frame_bytes(datagram) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(error = %e, "Dropping malformed datagram");
                continue;
            }
        };

        if !frame.msg_type.is_data() {
            tracing::debug!(msg_type = ?frame.msg_type, "Ignoring control frame on data channel");
            continue;
        }

        if let Some(expected) = expected_sequence {
            if frame.sequence != expected {
                tracing::debug!(expected, got = frame.sequence, "IQ sequence gap");
            }
        }
        expected_sequence = Some(frame.sequence.wrapping_add(1));

        // No subscribers is not an error.
        let _ = iq_tx.send(IqFrame {
            msg_type: frame.msg_type,
            sequence: frame.sequence,
            body: frame.body,
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use netsdr_test_harness::{
        MockControlChannel, MockControlHandle, MockDataChannel, MockDataHandle,
    };

    const SETUP_SAMPLE_RATE: [u8; 9] = [0x09, 0x00, 0xB8, 0x00, 0x00, 0xA0, 0x86, 0x01, 0x00];
    const SETUP_RF_FILTER: [u8; 6] = [0x06, 0x00, 0x44, 0x00, 0x00, 0x00];
    const SETUP_AD_MODES: [u8; 6] = [0x06, 0x00, 0x8A, 0x00, 0x00, 0x03];
    const RUN: [u8; 8] = [0x08, 0x00, 0x18, 0x00, 0x80, 0x02, 0x01, 0x01];
    const IDLE: [u8; 8] = [0x08, 0x00, 0x18, 0x00, 0x00, 0x01, 0x00, 0x00];
    const ACK: [u8; 4] = [0x04, 0x60, 0x18, 0x00];

    fn client_with(options: ClientOptions) -> (NetSdrClient, MockControlHandle, MockDataHandle) {
        let (control, control_handle) = MockControlChannel::new();
        let (data, data_handle) = MockDataChannel::new();
        let client = NetSdrClient::new(Box::new(control), Box::new(data), options);
        (client, control_handle, data_handle)
    }

    fn client() -> (NetSdrClient, MockControlHandle, MockDataHandle) {
        client_with(ClientOptions::default())
    }

    async fn wait_for_sends(handle: &MockControlHandle, count: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while handle.send_count() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    async fn next_event(rx: &mut broadcast::Receiver<ClientEvent>) -> ClientEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    // -----------------------------------------------------------------------
    // connect / disconnect
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_connect_sends_setup_sequence() {
        let (client, control, _data) = client();
        client.connect().await.unwrap();

        assert!(client.is_connected());
        let sent = control.sent_frames();
        assert_eq!(sent.len(), 3);
        assert_eq!(&sent[0][..], &SETUP_SAMPLE_RATE);
        assert_eq!(&sent[1][..], &SETUP_RF_FILTER);
        assert_eq!(&sent[2][..], &SETUP_AD_MODES);
    }

    #[tokio::test]
    async fn test_connect_twice_is_idempotent() {
        let (client, control, _data) = client();
        client.connect().await.unwrap();
        client.connect().await.unwrap();

        assert_eq!(control.connect_calls(), 1);
        assert_eq!(control.send_count(), 3);
    }

    #[tokio::test]
    async fn test_connect_uses_configured_sample_rate() {
        let (client, control, _data) = client_with(ClientOptions {
            sample_rate: 2_000_000,
            ..ClientOptions::default()
        });
        client.connect().await.unwrap();

        // 2_000_000 = 0x001E_8480
        assert_eq!(
            &control.sent_frames()[0][..],
            &[0x09, 0x00, 0xB8, 0x00, 0x00, 0x80, 0x84, 0x1E, 0x00]
        );
    }

    #[tokio::test]
    async fn test_connect_failure_stays_disconnected() {
        let (client, control, _data) = client();
        control.refuse_connect(true);

        let result = client.connect().await;
        assert!(matches!(result, Err(Error::Transport(_))));
        assert!(!client.is_connected());
        assert_eq!(control.send_count(), 0);

        control.refuse_connect(false);
        client.connect().await.unwrap();
        assert!(client.is_connected());
        assert_eq!(control.connect_calls(), 2);
    }

    #[tokio::test]
    async fn test_disconnect_always_reaches_channel() {
        let (client, control, _data) = client();
        client.disconnect().await.unwrap();
        assert_eq!(control.disconnect_calls(), 1);

        client.connect().await.unwrap();
        client.disconnect().await.unwrap();
        assert_eq!(control.disconnect_calls(), 2);
        assert!(!client.is_connected());
        assert_eq!(client.state(), SessionState::default());
    }

    #[tokio::test]
    async fn test_reconnect_after_disconnect_resends_setup() {
        let (client, control, _data) = client();
        client.connect().await.unwrap();
        client.disconnect().await.unwrap();
        client.connect().await.unwrap();

        assert_eq!(control.connect_calls(), 2);
        assert_eq!(control.send_count(), 6);
    }

    #[tokio::test]
    async fn test_lifecycle_events() {
        let (client, _control, _data) = client();
        let mut events = client.subscribe();

        client.connect().await.unwrap();
        assert_eq!(next_event(&mut events).await, ClientEvent::Connected);

        client.start_iq().await.unwrap();
        assert_eq!(next_event(&mut events).await, ClientEvent::IqStarted);

        client.stop_iq().await.unwrap();
        assert_eq!(next_event(&mut events).await, ClientEvent::IqStopped);

        client.disconnect().await.unwrap();
        assert_eq!(next_event(&mut events).await, ClientEvent::Disconnected);

        // A second disconnect has nothing to report.
        client.disconnect().await.unwrap();
        assert!(events.try_recv().is_err());
    }

    // -----------------------------------------------------------------------
    // change_frequency
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_change_frequency_while_disconnected_sends_nothing() {
        let (client, control, _data) = client();
        client.change_frequency(14_010_000, 0).await.unwrap();
        assert_eq!(control.send_count(), 0);
    }

    #[tokio::test]
    async fn test_change_frequency_encodes_40_bit_frequency() {
        let (client, control, _data) = client();
        client.connect().await.unwrap();
        client.change_frequency(14_010_000, 0).await.unwrap();

        let sent = control.sent_frames();
        assert_eq!(sent.len(), 4);
        assert_eq!(
            &sent[3][..],
            &[0x0A, 0x00, 0x20, 0x00, 0x00, 0x90, 0xC6, 0xD5, 0x00, 0x00]
        );
    }

    #[tokio::test]
    async fn test_change_frequency_rejects_oversized_value() {
        let (client, control, _data) = client();
        client.connect().await.unwrap();

        let result = client.change_frequency(1 << 40, 0).await;
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
        assert_eq!(control.send_count(), 3);
    }

    // -----------------------------------------------------------------------
    // IQ streaming
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_start_iq_while_disconnected_is_noop() {
        let (client, control, data) = client();
        client.start_iq().await.unwrap();

        assert!(!client.iq_started());
        assert_eq!(data.start_calls(), 0);
        assert_eq!(control.send_count(), 0);
    }

    #[tokio::test]
    async fn test_start_iq_sends_run_then_starts_data_channel() {
        let (client, control, data) = client();
        client.connect().await.unwrap();
        client.start_iq().await.unwrap();

        assert!(client.iq_started());
        assert_eq!(data.start_calls(), 1);
        assert!(data.is_receiving());
        assert_eq!(&control.sent_frames()[3][..], &RUN);
    }

    #[tokio::test]
    async fn test_start_stop_start_restarts_streaming() {
        let (client, _control, data) = client();
        client.connect().await.unwrap();

        client.start_iq().await.unwrap();
        client.stop_iq().await.unwrap();
        assert!(!client.iq_started());
        client.start_iq().await.unwrap();

        assert!(client.iq_started());
        assert_eq!(data.start_calls(), 2);
        assert_eq!(data.stop_calls(), 1);
    }

    #[tokio::test]
    async fn test_start_iq_twice_rearms_data_channel() {
        let (client, _control, data) = client();
        client.connect().await.unwrap();

        client.start_iq().await.unwrap();
        client.start_iq().await.unwrap();

        assert!(client.iq_started());
        assert_eq!(data.start_calls(), 2);
        assert_eq!(data.stop_calls(), 0);
    }

    #[tokio::test]
    async fn test_failed_rearm_clears_iq_started() {
        let (client, _control, data) = client();
        let mut events = client.subscribe();
        let mut iq = client.subscribe_iq();
        client.connect().await.unwrap();
        client.start_iq().await.unwrap();
        assert_eq!(next_event(&mut events).await, ClientEvent::Connected);
        assert_eq!(next_event(&mut events).await, ClientEvent::IqStarted);

        data.refuse_start(true);
        let result = client.start_iq().await;
        assert!(matches!(result, Err(Error::Transport(_))));
        assert!(!client.iq_started());
        assert_eq!(next_event(&mut events).await, ClientEvent::IqStopped);

        assert!(!data.deliver(&[0x06, 0x80, 0x01, 0x00, 0xAA, 0xBB]).await);
        assert!(iq.try_recv().is_err());

        // A later start succeeds and streaming resumes.
        data.refuse_start(false);
        client.start_iq().await.unwrap();
        assert!(client.iq_started());
        assert_eq!(data.start_calls(), 3);
    }

    #[tokio::test]
    async fn test_failed_first_start_stays_stopped() {
        let (client, _control, data) = client();
        let mut events = client.subscribe();
        client.connect().await.unwrap();
        assert_eq!(next_event(&mut events).await, ClientEvent::Connected);

        data.refuse_start(true);
        assert!(client.start_iq().await.is_err());
        assert!(!client.iq_started());
        assert!(events.try_recv().is_err());

        // Nothing to stop.
        client.stop_iq().await.unwrap();
        assert_eq!(data.stop_calls(), 0);
    }

    #[tokio::test]
    async fn test_stop_iq_when_not_streaming_is_noop() {
        let (client, control, data) = client();
        client.stop_iq().await.unwrap();
        client.connect().await.unwrap();
        client.stop_iq().await.unwrap();

        assert!(!client.iq_started());
        assert_eq!(data.stop_calls(), 0);
        assert_eq!(control.send_count(), 3);
    }

    #[tokio::test]
    async fn test_stop_iq_sends_idle_when_connected() {
        let (client, control, _data) = client();
        client.connect().await.unwrap();
        client.start_iq().await.unwrap();
        client.stop_iq().await.unwrap();

        let sent = control.sent_frames();
        assert_eq!(sent.len(), 5);
        assert_eq!(&sent[4][..], &IDLE);
    }

    #[tokio::test]
    async fn test_disconnect_leaves_iq_running() {
        let (client, control, data) = client();
        client.connect().await.unwrap();
        client.start_iq().await.unwrap();

        client.disconnect().await.unwrap();
        assert!(!client.is_connected());
        assert!(client.iq_started());
        assert_eq!(data.stop_calls(), 0);
        assert!(data.is_receiving());

        // Stopping afterwards skips the idle command.
        client.stop_iq().await.unwrap();
        assert_eq!(data.stop_calls(), 1);
        assert_eq!(control.send_count(), 4);
    }

    #[tokio::test]
    async fn test_iq_frames_are_published() {
        let (client, _control, data) = client();
        let mut iq = client.subscribe_iq();
        client.connect().await.unwrap();
        client.start_iq().await.unwrap();

        // Length mismatch, then a control frame, then a valid data item.
        assert!(data.deliver(&[0x09, 0x80, 0x00, 0x00, 0x01]).await);
        assert!(data.deliver(&ACK).await);
        assert!(
            data.deliver(&[0x08, 0x80, 0x05, 0x00, 0x01, 0x00, 0x02, 0x00])
                .await
        );

        let frame = tokio::time::timeout(Duration::from_secs(2), iq.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame.msg_type, MessageType::DataItem0);
        assert_eq!(frame.sequence, 5);
        let samples: Vec<u32> = frame.samples(protocol::IQ_SAMPLE_BITS).unwrap().collect();
        assert_eq!(samples, vec![1, 2]);
        assert!(iq.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_no_iq_frames_after_stop() {
        let (client, _control, data) = client();
        let mut iq = client.subscribe_iq();
        client.connect().await.unwrap();
        client.start_iq().await.unwrap();
        client.stop_iq().await.unwrap();

        assert!(!data.deliver(&[0x06, 0x80, 0x01, 0x00, 0xAA, 0xBB]).await);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(matches!(
            iq.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_iq_frame_samples_rejects_bad_width() {
        let frame = IqFrame {
            msg_type: MessageType::DataItem1,
            sequence: 0,
            body: Bytes::from_static(&[1, 2, 3, 4]),
        };
        assert!(matches!(frame.samples(0), Err(Error::OutOfRange(_))));
        assert!(matches!(frame.samples(40), Err(Error::OutOfRange(_))));
        assert_eq!(frame.samples(8).unwrap().len(), 4);
    }

    // -----------------------------------------------------------------------
    // Request/response correlation
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_send_request_while_disconnected() {
        let (client, control, _data) = client();
        let result = client.send_request(&IDLE).await;
        assert!(matches!(result, Err(Error::NotConnected)));
        assert_eq!(control.send_count(), 0);
    }

    #[tokio::test]
    async fn test_response_is_next_inbound_frame() {
        let (client, control, _data) = client();
        client.connect().await.unwrap();
        control.queue_response(&ACK);

        let response = client.send_request(&IDLE).await.unwrap();
        assert_eq!(&response[..], &ACK);
    }

    #[tokio::test]
    async fn test_second_request_rejected_while_first_in_flight() {
        let (client, control, _data) = client();
        client.connect().await.unwrap();
        control.set_echo(false);

        let client = Arc::new(client);
        let first = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.send_request(&RUN).await })
        };
        wait_for_sends(&control, 4).await;

        let second = client.send_request(&IDLE).await;
        assert!(matches!(second, Err(Error::RequestInFlight)));
        assert_eq!(control.send_count(), 4);

        assert!(control.inject(&ACK).await);
        let response = first.await.unwrap().unwrap();
        assert_eq!(&response[..], &ACK);

        // The slot is free again.
        control.set_echo(true);
        client.send_request(&IDLE).await.unwrap();
    }

    #[tokio::test]
    async fn test_response_timeout_frees_slot() {
        let (client, control, _data) = client_with(ClientOptions {
            response_timeout: Some(Duration::from_millis(50)),
            ..ClientOptions::default()
        });
        client.connect().await.unwrap();
        control.set_echo(false);

        let result = client.change_frequency(7_100_000, 0).await;
        assert!(matches!(result, Err(Error::Timeout)));

        control.set_echo(true);
        client.change_frequency(7_100_000, 0).await.unwrap();
        assert_eq!(control.send_count(), 5);
    }

    #[tokio::test]
    async fn test_timeout_keeps_slot_claimed_by_next_request() {
        let (client, control, _data) = client_with(ClientOptions {
            response_timeout: Some(Duration::from_millis(50)),
            ..ClientOptions::default()
        });
        client.connect().await.unwrap();
        control.set_echo(false);

        let client = Arc::new(client);
        let timed_out = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.send_request(&RUN).await })
        };
        wait_for_sends(&control, 4).await;

        // Hold the slot across the timeout and hand it to another waiter,
        // as a concurrent request would once the first waiter closed.
        let (next_tx, mut next_rx) = oneshot::channel();
        {
            let mut slot = client.pending.lock().await;
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert!(slot.as_ref().is_some_and(|waiter| waiter.is_closed()));
            *slot = Some(next_tx);
        }

        let result = timed_out.await.unwrap();
        assert!(matches!(result, Err(Error::Timeout)));

        // The newer waiter is still in place and still resolvable.
        assert!(client.pending.lock().await.is_some());
        assert!(matches!(
            next_rx.try_recv(),
            Err(oneshot::error::TryRecvError::Empty)
        ));
        assert!(control.inject(&ACK).await);
        let response = tokio::time::timeout(Duration::from_secs(2), next_rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&response[..], &ACK);
    }

    #[tokio::test]
    async fn test_abandoned_request_does_not_block_next() {
        let (client, control, _data) = client();
        client.connect().await.unwrap();
        control.set_echo(false);

        let abandoned =
            tokio::time::timeout(Duration::from_millis(20), client.send_request(&RUN)).await;
        assert!(abandoned.is_err());

        control.set_echo(true);
        client.send_request(&IDLE).await.unwrap();
    }

    #[tokio::test]
    async fn test_unsolicited_frame_is_reported() {
        let (client, control, _data) = client();
        let mut events = client.subscribe();
        client.connect().await.unwrap();
        assert_eq!(next_event(&mut events).await, ClientEvent::Connected);

        assert!(control.inject(&ACK).await);
        assert_eq!(
            next_event(&mut events).await,
            ClientEvent::UnsolicitedFrame { len: 4 }
        );
    }

    #[tokio::test]
    async fn test_connection_lost_fails_pending_request() {
        let (client, control, _data) = client();
        let mut events = client.subscribe();
        client.connect().await.unwrap();
        assert_eq!(next_event(&mut events).await, ClientEvent::Connected);
        control.set_echo(false);

        let client = Arc::new(client);
        let pending = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.send_request(&RUN).await })
        };
        wait_for_sends(&control, 4).await;

        control.sever();
        let result = pending.await.unwrap();
        assert!(matches!(result, Err(Error::ConnectionLost)));
        assert_eq!(next_event(&mut events).await, ClientEvent::Disconnected);
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_disconnect_fails_pending_request() {
        let (client, control, _data) = client();
        client.connect().await.unwrap();
        control.set_echo(false);

        let client = Arc::new(client);
        let pending = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.send_request(&RUN).await })
        };
        wait_for_sends(&control, 4).await;

        client.disconnect().await.unwrap();
        let result = pending.await.unwrap();
        assert!(matches!(result, Err(Error::ConnectionLost)));
    }
}
