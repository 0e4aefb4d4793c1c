//! Scripted TCP radio for socket-level testing.
//!
//! [`MockRadioServer`] listens on a random localhost port, accepts a single
//! connection, and works through a queue of expectations: for each one it
//! reads one complete frame (using the header's length field), checks it
//! against the expected request, and writes back the scripted response.
//!
//! # Example
//!
//! ```
//! use netsdr_test_harness::MockRadioServer;
//!
//! # async fn example() -> netsdr_core::Result<()> {
//! let mut server = MockRadioServer::new().await?;
//! server.expect(&[0x04, 0x00, 0x18, 0x00], &[0x04, 0x60, 0x18, 0x00]);
//! let addr = server.addr().to_string();
//! server.start();
//! // ... connect a TcpControlChannel to `addr` ...
//! server.wait().await.map_err(netsdr_core::Error::Transport)?;
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use netsdr_core::error::{Error, Result};
use netsdr_core::frame::{self, HEADER_LEN};

/// A pre-loaded request/response pair.
#[derive(Debug, Clone)]
struct Expectation {
    request: Vec<u8>,
    response: Vec<u8>,
}

/// A single-connection scripted radio.
pub struct MockRadioServer {
    addr: String,
    listener: Option<TcpListener>,
    expectations: VecDeque<Expectation>,
    unsolicited: Vec<Vec<u8>>,
    server_handle: Option<JoinHandle<std::result::Result<(), String>>>,
}

impl MockRadioServer {
    /// Bind a listener on `127.0.0.1` with an OS-assigned port.
    pub async fn new() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| Error::Transport(format!("failed to bind mock radio: {}", e)))?;
        let addr = listener.local_addr().map_err(Error::Io)?.to_string();

        Ok(Self {
            addr,
            listener: Some(listener),
            expectations: VecDeque::new(),
            unsolicited: Vec::new(),
            server_handle: None,
        })
    }

    /// Add an expected request/response pair. Consumed in order.
    pub fn expect(&mut self, request: &[u8], response: &[u8]) {
        self.expectations.push_back(Expectation {
            request: request.to_vec(),
            response: response.to_vec(),
        });
    }

    /// Queue bytes written to the client immediately after it connects,
    /// before any expectation is processed.
    pub fn greet(&mut self, bytes: &[u8]) {
        self.unsolicited.push(bytes.to_vec());
    }

    /// Address the server is listening on.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Start serving in a background task.
    ///
    /// The listener is already bound, so clients may connect as soon as
    /// [`new`](Self::new) returns.
    pub fn start(&mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        let expectations: Vec<Expectation> = self.expectations.drain(..).collect();
        let unsolicited = std::mem::take(&mut self.unsolicited);

        let handle = tokio::spawn(async move {
            let (mut stream, peer) = listener
                .accept()
                .await
                .map_err(|e| format!("failed to accept connection: {}", e))?;
            tracing::debug!(peer = %peer, "Mock radio accepted connection");

            for bytes in &unsolicited {
                stream
                    .write_all(bytes)
                    .await
                    .map_err(|e| format!("greeting write error: {}", e))?;
            }

            for (i, expectation) in expectations.iter().enumerate() {
                let request = read_frame(&mut stream)
                    .await
                    .map_err(|e| format!("expectation {}: {}", i, e))?;

                if request != expectation.request {
                    return Err(format!(
                        "expectation {}: request mismatch: expected {:02X?}, got {:02X?}",
                        i, expectation.request, request
                    ));
                }

                stream
                    .write_all(&expectation.response)
                    .await
                    .map_err(|e| format!("expectation {}: write error: {}", i, e))?;
                stream
                    .flush()
                    .await
                    .map_err(|e| format!("expectation {}: flush error: {}", i, e))?;
            }

            Ok(())
        });

        self.server_handle = Some(handle);
    }

    /// Wait for the server task to finish and report any mismatch.
    pub async fn wait(self) -> std::result::Result<(), String> {
        match self.server_handle {
            Some(handle) => handle
                .await
                .map_err(|e| format!("server task panicked: {}", e))?,
            None => Ok(()),
        }
    }
}

/// Read one complete frame, sized by its header.
async fn read_frame(stream: &mut TcpStream) -> std::result::Result<Vec<u8>, String> {
    let mut header = [0u8; HEADER_LEN];
    stream
        .read_exact(&mut header)
        .await
        .map_err(|e| format!("client disconnected before header: {}", e))?;

    let (_, length_field) = frame::decode_header(u16::from_le_bytes(header));
    let total = frame::announced_len(length_field).max(HEADER_LEN);

    let mut buf = header.to_vec();
    buf.resize(total, 0);
    stream
        .read_exact(&mut buf[HEADER_LEN..])
        .await
        .map_err(|e| format!("client disconnected mid-frame: {}", e))?;
    Ok(buf)
}
