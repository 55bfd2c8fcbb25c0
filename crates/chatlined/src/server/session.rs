//! Per-connection session.
//!
//! Each accepted connection gets its own `Session` task that:
//! - Reads the first line as the peer's identity and registers itself
//! - Echoes every following line back to the peer
//! - Runs the disconnect handshake, in either direction
//! - Deregisters itself and releases the connection on every exit path
//!
//! The write half lives behind a per-session mutex and is shared with the
//! registry through [`SessionHandle`], so the dispatcher and the session's
//! own replies never interleave partial lines.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Connection errors are logged and result in a single cleanup pass

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::{mpsc, Mutex};
use tokio::time::{sleep_until, timeout, Instant};
use tokio_util::codec::FramedRead;
use tracing::{debug, warn};

use chatline_core::{DomainError, Identity, ServerConfig, SessionInfo, SessionKey, SessionState};
use chatline_protocol::{
    echo, encode_line, greeting, is_sentinel_command, line_codec, InboundLine, LineCodec,
    ProtocolError, SENTINEL,
};

use crate::events::SharedEventSink;
use crate::registry::{RegistryError, RegistryHandle};

/// Write timeout (10 seconds)
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Read half of a connection, boxed so sessions run over any byte stream.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write half of a connection.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Exclusive-write handle to a session's outbound stream.
pub type SessionWriter = Arc<Mutex<BufWriter<BoxedWriter>>>;

/// Wraps a write half in the shared, lock-protected writer.
pub fn session_writer(writer: impl AsyncWrite + Send + Unpin + 'static) -> SessionWriter {
    let boxed: BoxedWriter = Box::new(writer);
    Arc::new(Mutex::new(BufWriter::new(boxed)))
}

/// Writes one line under the session's write lock.
async fn write_line(writer: &SessionWriter, line: &str) -> Result<(), SessionError> {
    let framed = encode_line(line);
    let mut writer = writer.lock().await;

    match timeout(WRITE_TIMEOUT, async {
        writer.write_all(framed.as_bytes()).await?;
        writer.flush().await?;
        Ok::<(), std::io::Error>(())
    })
    .await
    {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(SessionError::Io(e)),
        Err(_) => Err(SessionError::WriteTimeout),
    }
}

// ============================================================================
// Session Handle
// ============================================================================

/// Out-of-band instructions delivered to a running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionControl {
    /// The sentinel was written to the peer; treat the next line as its answer.
    AwaitDisconnectAck,
}

/// Cheap-to-clone reference to a live session, as stored in the registry.
#[derive(Clone)]
pub struct SessionHandle {
    info: SessionInfo,
    writer: SessionWriter,
    control: mpsc::UnboundedSender<SessionControl>,
}

impl SessionHandle {
    pub fn new(
        info: SessionInfo,
        writer: SessionWriter,
        control: mpsc::UnboundedSender<SessionControl>,
    ) -> Self {
        Self {
            info,
            writer,
            control,
        }
    }

    pub fn key(&self) -> SessionKey {
        self.info.key
    }

    pub fn identity(&self) -> &Identity {
        &self.info.identity
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    /// Writes a line to the peer. Serialized with every other writer of this session.
    pub async fn send_line(&self, line: &str) -> Result<(), SessionError> {
        write_line(&self.writer, line).await
    }

    /// Asks the session to wait for a disconnect acknowledgement.
    ///
    /// Returns `false` if the session task has already exited.
    pub fn arm_disconnect(&self) -> bool {
        self.control.send(SessionControl::AwaitDisconnectAck).is_ok()
    }

    /// Returns true once the owning session task has finished.
    pub fn is_closed(&self) -> bool {
        self.control.is_closed()
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("key", &self.info.key)
            .field("identity", &self.info.identity)
            .field("remote_endpoint", &self.info.remote_endpoint)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Session
// ============================================================================

/// Per-session settings derived from [`ServerConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// `None` waits for a disconnect acknowledgement indefinitely.
    pub ack_timeout: Option<Duration>,
    pub max_line_length: usize,
}

impl From<&ServerConfig> for SessionConfig {
    fn from(config: &ServerConfig) -> Self {
        Self {
            ack_timeout: config.disconnect_ack_timeout(),
            max_line_length: config.max_line_length,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

/// Why a session ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer sent the sentinel; it was acknowledged.
    PeerRequested,
    /// The peer acknowledged a server-initiated disconnect.
    AckReceived,
    /// The peer answered a server-initiated disconnect with something else.
    AckMismatch,
    /// The peer did not answer a server-initiated disconnect in time.
    AckTimeout,
    /// The peer closed the connection.
    Eof,
}

/// One client connection and its protocol state.
pub struct Session {
    key: SessionKey,
    remote: SocketAddr,
    lines: FramedRead<BoxedReader, LineCodec>,
    writer: SessionWriter,
    control_tx: mpsc::UnboundedSender<SessionControl>,
    control_rx: mpsc::UnboundedReceiver<SessionControl>,
    registry: RegistryHandle,
    events: SharedEventSink,
    config: SessionConfig,
    state: SessionState,
    info: Option<SessionInfo>,
    registered: bool,
}

impl Session {
    /// Creates a session over an already-split connection.
    pub fn new(
        key: SessionKey,
        remote: SocketAddr,
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
        registry: RegistryHandle,
        events: SharedEventSink,
        config: SessionConfig,
    ) -> Self {
        let reader: BoxedReader = Box::new(reader);
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        Self {
            key,
            remote,
            lines: FramedRead::new(reader, line_codec(config.max_line_length)),
            writer: session_writer(writer),
            control_tx,
            control_rx,
            registry,
            events,
            config,
            state: SessionState::Handshaking,
            info: None,
            registered: false,
        }
    }

    /// Runs the session to completion.
    ///
    /// Cleanup (deregistration, connection shutdown, disconnect log line)
    /// happens exactly once before this returns, whatever the outcome.
    pub async fn run(mut self) -> Result<CloseReason, SessionError> {
        debug!(key = %self.key, remote = %self.remote, "New connection");

        let result = match self.handshake().await {
            Ok(()) => self.process_lines().await,
            Err(e) => Err(e),
        };

        self.close(&result).await;
        result
    }

    /// Reads the identity line, registers, and greets the peer.
    async fn handshake(&mut self) -> Result<(), SessionError> {
        let identity = match self.lines.next().await {
            Some(Ok(line)) => Identity::new(line),
            Some(Err(e)) => return Err(e.into()),
            None => return Err(SessionError::HandshakeEof),
        };

        self.state.transition(SessionState::Active)?;

        let info = SessionInfo::new(self.key, identity, self.remote);
        let handle = SessionHandle::new(
            info.clone(),
            Arc::clone(&self.writer),
            self.control_tx.clone(),
        );

        if let Some(displaced) = self.registry.register(handle).await? {
            debug!(
                key = %self.key,
                displaced = %displaced,
                identity = %info.identity,
                "Identity already registered, replacing lookup entry"
            );
        }
        self.registered = true;

        self.events
            .on_log(&format!("Client connected: {}", info.display_label()));

        let hello = greeting(&info.identity);
        self.info = Some(info);
        write_line(&self.writer, &hello).await
    }

    /// Main read loop. Returns when the session should close.
    async fn process_lines(&mut self) -> Result<CloseReason, SessionError> {
        let mut ack_deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                biased;

                Some(control) = self.control_rx.recv() => {
                    self.handle_control(control, &mut ack_deadline)?;
                }

                () = deadline_elapsed(ack_deadline) => {
                    self.events.on_log(&format!(
                        "No disconnect ACK from {}, closing",
                        self.identity_str()
                    ));
                    return Ok(CloseReason::AckTimeout);
                }

                next = self.lines.next() => {
                    let line = match next {
                        Some(Ok(line)) => line,
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            debug!(key = %self.key, "Peer sent EOF");
                            return Ok(CloseReason::Eof);
                        }
                    };

                    if let Some(reason) = self.handle_line(&line).await? {
                        return Ok(reason);
                    }
                }
            }
        }
    }

    fn handle_control(
        &mut self,
        control: SessionControl,
        ack_deadline: &mut Option<Instant>,
    ) -> Result<(), SessionError> {
        match control {
            SessionControl::AwaitDisconnectAck => {
                if self.state != SessionState::Active {
                    debug!(key = %self.key, state = %self.state, "Disconnect already pending");
                    return Ok(());
                }
                self.state.transition(SessionState::DisconnectPending)?;
                *ack_deadline = self.config.ack_timeout.map(|t| Instant::now() + t);
                self.events.on_log(&format!(
                    "Server initiated disconnect for {}",
                    self.identity_str()
                ));
            }
        }
        Ok(())
    }

    /// Applies one received line. `Some` ends the read loop.
    async fn handle_line(&mut self, line: &str) -> Result<Option<CloseReason>, SessionError> {
        match self.state {
            SessionState::Active => {
                self.events
                    .on_log(&format!("{}: {line}", self.identity_str()));

                match InboundLine::classify(line) {
                    InboundLine::DisconnectRequest => Ok(Some(CloseReason::PeerRequested)),
                    InboundLine::Chat(text) => {
                        write_line(&self.writer, &echo(text)).await?;
                        Ok(None)
                    }
                }
            }
            SessionState::DisconnectPending => {
                if is_sentinel_command(line) {
                    self.events.on_log(&format!(
                        "Received disconnect ACK from {}",
                        self.identity_str()
                    ));
                    Ok(Some(CloseReason::AckReceived))
                } else {
                    self.events.on_log(&format!(
                        "Expected disconnect ACK from {}, got: {line}",
                        self.identity_str()
                    ));
                    Ok(Some(CloseReason::AckMismatch))
                }
            }
            SessionState::Handshaking | SessionState::Closed => {
                warn!(key = %self.key, state = %self.state, "Line received outside the read loop");
                Ok(None)
            }
        }
    }

    /// Single cleanup pass shared by every exit path.
    async fn close(&mut self, result: &Result<CloseReason, SessionError>) {
        if self.state.transition(SessionState::Closed).is_err() {
            return;
        }

        if self.registered {
            match self.registry.unregister(self.key).await {
                Ok(true) => {}
                Ok(false) => debug!(key = %self.key, "Session was not in registry"),
                Err(e) => debug!(key = %self.key, error = %e, "Failed to unregister session"),
            }
        }

        // Deregistered first, so a peer that sees the acknowledgement never
        // finds itself still listed.
        if matches!(result, Ok(CloseReason::PeerRequested)) {
            match write_line(&self.writer, SENTINEL).await {
                Ok(()) => self.events.on_log(&format!(
                    "Sent disconnect ACK to {}",
                    self.identity_str()
                )),
                Err(e) => debug!(key = %self.key, error = %e, "Failed to send disconnect ACK"),
            }
        }

        match result {
            Err(SessionError::HandshakeEof) => {
                debug!(key = %self.key, remote = %self.remote, "Connection closed before identity");
            }
            Err(e) => self.events.on_log(&format!("Connection error: {e}")),
            Ok(_) => {}
        }

        {
            let mut writer = self.writer.lock().await;
            match timeout(WRITE_TIMEOUT, writer.shutdown()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(key = %self.key, error = %e, "Shutdown failed"),
                Err(_) => debug!(key = %self.key, "Shutdown timed out"),
            }
        }

        if let Some(info) = &self.info {
            self.events
                .on_log(&format!("Client disconnected: {}", info.display_label()));
        }
    }

    fn identity_str(&self) -> &str {
        self.info
            .as_ref()
            .map(|info| info.identity.as_str())
            .unwrap_or_default()
    }
}

/// Resolves at `deadline`, or never when there is none.
async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Errors that end a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Connection closed before identity was received")]
    HandshakeEof,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Write timeout")]
    WriteTimeout,

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    State(#[from] DomainError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ChannelSink, ServerEvent};
    use crate::registry::spawn_registry;
    use tokio::io::{duplex, AsyncBufReadExt, BufReader, DuplexStream};
    use tokio::task::JoinHandle;

    struct Harness {
        registry: RegistryHandle,
        events: mpsc::UnboundedReceiver<ServerEvent>,
        peer_reader: BufReader<tokio::io::ReadHalf<DuplexStream>>,
        peer_writer: tokio::io::WriteHalf<DuplexStream>,
        task: JoinHandle<Result<CloseReason, SessionError>>,
    }

    impl Harness {
        fn start(config: SessionConfig) -> Self {
            let (sink, events) = ChannelSink::new();
            let sink: SharedEventSink = Arc::new(sink);
            let registry = spawn_registry(Arc::clone(&sink));

            let (server_side, peer_side) = duplex(4096);
            let (server_read, server_write) = tokio::io::split(server_side);
            let (peer_read, peer_write) = tokio::io::split(peer_side);

            let session = Session::new(
                SessionKey::new(1),
                SocketAddr::from(([127, 0, 0, 1], 50000)),
                server_read,
                server_write,
                registry.clone(),
                sink,
                config,
            );

            Self {
                registry,
                events,
                peer_reader: BufReader::new(peer_read),
                peer_writer: peer_write,
                task: tokio::spawn(session.run()),
            }
        }

        async fn send(&mut self, line: &str) {
            self.peer_writer.write_all(encode_line(line).as_bytes()).await.unwrap();
            self.peer_writer.flush().await.unwrap();
        }

        async fn recv(&mut self) -> Option<String> {
            let mut line = String::new();
            let n = timeout(Duration::from_secs(2), self.peer_reader.read_line(&mut line))
                .await
                .expect("read timed out")
                .unwrap();
            if n == 0 {
                return None;
            }
            Some(line.trim_end_matches('\n').to_string())
        }

        fn drain_logs(&mut self) -> Vec<String> {
            let mut logs = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                if let ServerEvent::Log(line) = event {
                    logs.push(line);
                }
            }
            logs
        }
    }

    #[tokio::test]
    async fn test_handshake_greets_and_registers() {
        let mut h = Harness::start(SessionConfig::default());
        h.send("alice").await;

        assert_eq!(h.recv().await.as_deref(), Some("Hello alice"));
        assert!(h.registry.lookup(&Identity::new("alice")).await.is_some());
    }

    #[tokio::test]
    async fn test_echo_and_peer_disconnect() {
        let mut h = Harness::start(SessionConfig::default());
        h.send("alice").await;
        h.recv().await;

        h.send("ping").await;
        assert_eq!(h.recv().await.as_deref(), Some("Echo: ping"));

        h.send("bye").await;
        assert_eq!(h.recv().await.as_deref(), Some("bye"));
        assert_eq!(h.recv().await, None);

        let reason = (&mut h.task).await.unwrap().unwrap();
        assert_eq!(reason, CloseReason::PeerRequested);
        assert!(h.registry.snapshot_all().await.is_empty());

        let logs = h.drain_logs();
        assert!(logs.iter().any(|l| l == "alice: ping"));
        assert!(logs.iter().any(|l| l == "Sent disconnect ACK to alice"));
        assert_eq!(
            logs.iter().filter(|l| l.starts_with("Client disconnected")).count(),
            1
        );
    }

    #[tokio::test]
    async fn test_uppercase_bye_is_chat() {
        let mut h = Harness::start(SessionConfig::default());
        h.send("alice").await;
        h.recv().await;

        h.send("BYE").await;
        assert_eq!(h.recv().await.as_deref(), Some("Echo: BYE"));
    }

    #[tokio::test]
    async fn test_eof_before_identity_never_registers() {
        let mut h = Harness::start(SessionConfig::default());
        h.peer_writer.shutdown().await.unwrap();

        let result = (&mut h.task).await.unwrap();
        assert!(matches!(result, Err(SessionError::HandshakeEof)));

        let mut saw_roster = false;
        while let Ok(event) = h.events.try_recv() {
            if matches!(event, ServerEvent::RosterAdded(_) | ServerEvent::RosterRemoved(_)) {
                saw_roster = true;
            }
        }
        assert!(!saw_roster);
    }

    #[tokio::test]
    async fn test_server_initiated_disconnect_acknowledged() {
        let mut h = Harness::start(SessionConfig::default());
        h.send("alice").await;
        h.recv().await;

        let handle = h.registry.lookup(&Identity::new("alice")).await.unwrap();
        assert!(handle.arm_disconnect());
        handle.send_line("bye").await.unwrap();
        assert_eq!(h.recv().await.as_deref(), Some("bye"));

        h.send(" BYE ").await;
        let reason = (&mut h.task).await.unwrap().unwrap();
        assert_eq!(reason, CloseReason::AckReceived);
        assert!(h.registry.lookup(&Identity::new("alice")).await.is_none());
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_server_initiated_disconnect_closes_on_any_reply() {
        let mut h = Harness::start(SessionConfig::default());
        h.send("alice").await;
        h.recv().await;

        let handle = h.registry.lookup(&Identity::new("alice")).await.unwrap();
        handle.arm_disconnect();
        handle.send_line("bye").await.unwrap();
        h.recv().await;

        h.send("wait what").await;
        let reason = (&mut h.task).await.unwrap().unwrap();
        assert_eq!(reason, CloseReason::AckMismatch);
        // No echo for the reply
        assert_eq!(h.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_initiated_disconnect_times_out() {
        let config = SessionConfig {
            ack_timeout: Some(Duration::from_secs(5)),
            ..SessionConfig::default()
        };
        let mut h = Harness::start(config);
        h.send("alice").await;
        h.recv().await;

        let handle = h.registry.lookup(&Identity::new("alice")).await.unwrap();
        handle.arm_disconnect();

        let reason = (&mut h.task).await.unwrap().unwrap();
        assert_eq!(reason, CloseReason::AckTimeout);
        assert!(h.registry.snapshot_all().await.is_empty());
    }

    #[test]
    fn test_io_error_keeps_source() {
        use std::error::Error as _;

        let err = SessionError::from(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "pipe closed",
        ));
        assert_eq!(err.to_string(), "I/O error: pipe closed");
        let source = err.source().expect("source");
        assert_eq!(source.to_string(), "pipe closed");
    }

    #[tokio::test]
    async fn test_write_failure_is_io_error() {
        let (server_side, peer_side) = duplex(64);
        drop(peer_side);
        let writer = session_writer(server_side);

        let err = write_line(&writer, "Hello alice").await.unwrap_err();
        assert!(matches!(err, SessionError::Io(_)));
    }

    #[tokio::test]
    async fn test_line_too_long_ends_session() {
        let config = SessionConfig {
            max_line_length: 8,
            ..SessionConfig::default()
        };
        let mut h = Harness::start(config);
        h.send("alice").await;
        h.recv().await;

        h.send("this line is far too long").await;
        let result = (&mut h.task).await.unwrap();
        assert!(matches!(
            result,
            Err(SessionError::Protocol(ProtocolError::LineTooLong { max: 8 }))
        ));
        assert!(h.registry.snapshot_all().await.is_empty());
        assert!(h.drain_logs().iter().any(|l| l.starts_with("Connection error")));
    }
}
