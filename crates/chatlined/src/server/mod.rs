//! TCP listener for the chat server.
//!
//! The server:
//! - Listens on a TCP socket for client connections
//! - Spawns a [`Session`] task for each accepted connection
//! - Supports graceful shutdown via CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   ChatServer    │
//! │                 │
//! │   TcpListener   │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │     Session     │────▶│  RegistryHandle │
//! │  (per client)   │     │                 │
//! └─────────────────┘     └────────┬────────┘
//!                                  │ snapshot / lookup
//!                                  ▼
//!                         ┌─────────────────┐
//!                         │   Dispatcher    │
//!                         └─────────────────┘
//! ```
//!
//! Stopping the listener does not close sessions that are already running.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Accept errors are logged and allow continued operation

mod session;

pub use session::{
    session_writer, CloseReason, Session, SessionConfig, SessionControl, SessionError,
    SessionHandle, SessionWriter,
};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use chatline_core::{ServerConfig, SessionKey};

use crate::events::SharedEventSink;
use crate::registry::RegistryHandle;

/// TCP server accepting chat sessions.
pub struct ChatServer {
    /// Bound listener
    listener: TcpListener,

    /// Actual bound address (resolves port 0)
    local_addr: SocketAddr,

    /// Handle to the session registry
    registry: RegistryHandle,

    /// Operator-facing event sink, shared with every session
    events: SharedEventSink,

    /// Settings copied into each new session
    session_config: SessionConfig,

    /// Cancellation token for graceful shutdown
    cancel_token: CancellationToken,

    /// Connection counter for generating session keys
    connection_counter: AtomicU64,
}

impl ChatServer {
    /// Binds the listener.
    ///
    /// # Errors
    ///
    /// - `ServerError::Bind` if the address is unavailable. Not retried.
    pub async fn bind(
        config: &ServerConfig,
        registry: RegistryHandle,
        events: SharedEventSink,
        cancel_token: CancellationToken,
    ) -> Result<Self, ServerError> {
        let addr = config.listen_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener.local_addr().map_err(ServerError::LocalAddr)?;

        Ok(Self {
            listener,
            local_addr,
            registry,
            events,
            session_config: SessionConfig::from(config),
            cancel_token,
            connection_counter: AtomicU64::new(1),
        })
    }

    /// Returns the bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    /// Runs the accept loop.
    ///
    /// Accepts connections until the cancellation token is triggered.
    pub async fn run(&self) {
        self.events
            .on_log(&format!("Server started on port {}", self.local_addr.port()));
        info!(addr = %self.local_addr, "Chat server listening");

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, remote)) => {
                            let conn_num = self.connection_counter.fetch_add(1, Ordering::Relaxed);
                            self.handle_connection(stream, remote, SessionKey::new(conn_num));
                        }
                        Err(_) if self.cancel_token.is_cancelled() => {
                            debug!("Accept failed during shutdown");
                            break;
                        }
                        Err(e) => {
                            // Continue accepting other connections
                            self.events.on_log(&format!("Server error: {e}"));
                        }
                    }
                }
            }
        }

        info!("Server stopped accepting connections");
    }

    /// Spawns a session task for an accepted connection.
    fn handle_connection(&self, stream: TcpStream, remote: SocketAddr, key: SessionKey) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(key = %key, error = %e, "Failed to set TCP_NODELAY");
        }

        let (reader, writer) = stream.into_split();
        let session = Session::new(
            key,
            remote,
            reader,
            writer,
            self.registry.clone(),
            self.events.clone(),
            self.session_config,
        );

        tokio::spawn(async move {
            match session.run().await {
                Ok(reason) => debug!(key = %key, reason = ?reason, "Session finished"),
                Err(e) => debug!(key = %key, error = %e, "Session ended with error"),
            }
        });
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read local address: {0}")]
    LocalAddr(#[source] std::io::Error),
}
