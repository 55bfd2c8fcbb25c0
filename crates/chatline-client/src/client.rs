//! Server connection for the chatline client.
//!
//! This module provides the `ChatClient` which handles:
//! - Connecting to the server over TCP and sending the identity line
//! - A background receive loop that forwards server lines as [`ClientEvent`]s
//! - Both directions of the disconnect handshake
//!
//! The sentinel means "disconnect" in both directions, so the client tracks
//! whether it asked first. A sentinel received while waiting is the
//! acknowledgement; any other received sentinel is a request from the server
//! and is answered before the connection is closed.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use chatline_core::{ClientConfig, Identity};
use chatline_protocol::{
    encode_line, is_sentinel_command, line_codec, parse_greeting, LineCodec, SENTINEL,
};

use crate::error::{ClientError, Result};

/// How long `disconnect` waits for the server's acknowledgement.
const ACK_WAIT: Duration = Duration::from_secs(2);

// ============================================================================
// Events
// ============================================================================

/// Everything the receive loop reports to the front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// The server accepted the identity (`Hello <identity>`).
    Greeted(Identity),

    /// Any other line from the server: echoes and operator messages.
    Message(String),

    /// The server asked to disconnect; the acknowledgement has been sent.
    DisconnectRequested,

    /// The server acknowledged our disconnect request.
    DisconnectAcknowledged,

    /// The connection failed or the server hung up unexpectedly.
    ConnectionLost(String),

    /// The receive loop has ended. Always the last event.
    Closed,
}

// ============================================================================
// Chat Client
// ============================================================================

/// State shared between the client handle and its receive loop.
struct Shared {
    writer: Mutex<BufWriter<OwnedWriteHalf>>,
    awaiting_ack: AtomicBool,
    closed: CancellationToken,
}

impl Shared {
    async fn write_line(&self, line: &str) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(encode_line(line).as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn shutdown(&self) {
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!(error = %e, "Shutdown failed");
        }
    }
}

/// A connected chat session.
///
/// # Example
///
/// ```rust,ignore
/// use chatline_client::{ChatClient, ClientEvent};
/// use chatline_core::{ClientConfig, Identity};
/// use tokio::sync::mpsc;
///
/// let (tx, mut rx) = mpsc::unbounded_channel();
/// let client = ChatClient::connect(&ClientConfig::default(), Identity::new("alice"), tx).await?;
/// client.send("ping").await?;
/// while let Some(event) = rx.recv().await {
///     if event == ClientEvent::Closed {
///         break;
///     }
/// }
/// ```
pub struct ChatClient {
    identity: Identity,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    shared: Arc<Shared>,
    receiver: JoinHandle<()>,
}

impl ChatClient {
    /// Connects to `config.target()` and sends the identity line.
    ///
    /// Server lines are delivered to `event_tx` from a background task until
    /// the connection ends, followed by a final [`ClientEvent::Closed`].
    pub async fn connect(
        config: &ClientConfig,
        identity: Identity,
        event_tx: mpsc::UnboundedSender<ClientEvent>,
    ) -> Result<Self> {
        if identity.as_str().trim().is_empty() {
            return Err(ClientError::EmptyIdentity);
        }

        let target = config.target();
        debug!(target = %target, "Connecting to server");

        let stream = TcpStream::connect(&target)
            .await
            .map_err(|source| ClientError::Connect {
                target: target.clone(),
                source,
            })?;
        let local_addr = stream.local_addr()?;
        let peer_addr = stream.peer_addr()?;

        let (reader, writer) = stream.into_split();
        let shared = Arc::new(Shared {
            writer: Mutex::new(BufWriter::new(writer)),
            awaiting_ack: AtomicBool::new(false),
            closed: CancellationToken::new(),
        });

        shared.write_line(identity.as_str()).await?;
        info!(identity = %identity, local = %local_addr, remote = %peer_addr, "Connected to server");

        let lines = FramedRead::new(reader, line_codec(config.max_line_length));
        let receiver = tokio::spawn(receive_loop(
            lines,
            identity.clone(),
            Arc::clone(&shared),
            event_tx,
        ));

        Ok(Self {
            identity,
            local_addr,
            peer_addr,
            shared,
            receiver,
        })
    }

    /// Sends one line of user input.
    ///
    /// Input is trimmed and blank input is ignored. Typing the sentinel
    /// starts a client-initiated disconnect.
    pub async fn send(&self, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }

        if is_sentinel_command(text) {
            self.shared.awaiting_ack.store(true, Ordering::SeqCst);
            debug!("Sent disconnect request, waiting for ACK");
            return self.shared.write_line(SENTINEL).await;
        }

        self.shared.write_line(text).await
    }

    /// Ends the session.
    ///
    /// Sends the sentinel unless a request is already outstanding, waits
    /// briefly for the receive loop to see the acknowledgement, then closes
    /// the connection.
    pub async fn disconnect(mut self) -> Result<()> {
        if self.is_connected() && !self.shared.awaiting_ack.swap(true, Ordering::SeqCst) {
            if let Err(e) = self.shared.write_line(SENTINEL).await {
                debug!(error = %e, "Failed to send disconnect request");
            }
        }

        if timeout(ACK_WAIT, &mut self.receiver).await.is_err() {
            warn!("No disconnect ACK from server, closing anyway");
            self.receiver.abort();
            self.shared.closed.cancel();
        }

        self.shared.shutdown().await;
        Ok(())
    }

    /// Waits for the receive loop to finish.
    pub async fn closed(&self) {
        self.shared.closed.cancelled().await;
    }

    /// True while the receive loop is running.
    pub fn is_connected(&self) -> bool {
        !self.shared.closed.is_cancelled()
    }

    /// True after a disconnect request was sent and before it was answered.
    pub fn is_awaiting_ack(&self) -> bool {
        self.shared.awaiting_ack.load(Ordering::SeqCst)
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        self.receiver.abort();
    }
}

// ============================================================================
// Receive Loop
// ============================================================================

/// Reads server lines until EOF, an error, or a sentinel.
async fn receive_loop(
    mut lines: FramedRead<OwnedReadHalf, LineCodec>,
    identity: Identity,
    shared: Arc<Shared>,
    event_tx: mpsc::UnboundedSender<ClientEvent>,
) {
    // Ignore send errors - the front end may already be gone
    let emit = |event: ClientEvent| {
        let _ = event_tx.send(event);
    };
    let mut greeted = false;

    loop {
        let line = match lines.next().await {
            Some(Ok(line)) => line,
            Some(Err(e)) => {
                emit(ClientEvent::ConnectionLost(e.to_string()));
                break;
            }
            None => {
                if !shared.awaiting_ack.load(Ordering::SeqCst) {
                    emit(ClientEvent::ConnectionLost(
                        "Server closed the connection".to_string(),
                    ));
                }
                break;
            }
        };

        if is_sentinel_command(&line) {
            if shared.awaiting_ack.load(Ordering::SeqCst) {
                debug!("Received disconnect ACK");
                emit(ClientEvent::DisconnectAcknowledged);
            } else {
                debug!("Received disconnect request, sending ACK");
                shared.awaiting_ack.store(true, Ordering::SeqCst);
                if let Err(e) = shared.write_line(SENTINEL).await {
                    debug!(error = %e, "Failed to send disconnect ACK");
                }
                emit(ClientEvent::DisconnectRequested);
            }
            break;
        }

        // The server is registered before it greets, so a broadcast can
        // arrive ahead of the greeting.
        if !greeted && parse_greeting(&line) == Some(identity.as_str()) {
            greeted = true;
            emit(ClientEvent::Greeted(identity.clone()));
            continue;
        }

        emit(ClientEvent::Message(line));
    }

    shared.closed.cancel();
    shared.shutdown().await;
    emit(ClientEvent::Closed);
}
