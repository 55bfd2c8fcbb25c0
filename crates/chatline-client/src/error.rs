//! Error types for the chatline client.
//!
//! All error types use `thiserror` for derive macros and provide clear,
//! user-friendly error messages.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::io;
use thiserror::Error;

use chatline_protocol::ProtocolError;

// ============================================================================
// Client Error Type
// ============================================================================

/// Client errors.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Failed to reach the server.
    ///
    /// Usually the server is not running or the host/port is wrong.
    #[error("Failed to connect to {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: io::Error,
    },

    /// The server uses the first line as the session name, so it must not be blank.
    #[error("Identity must not be empty")]
    EmptyIdentity,

    /// The session has already ended.
    #[error("Not connected")]
    NotConnected,

    /// Framing error on the connection.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// I/O error passthrough.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Convenience Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

// ============================================================================
// Tests
// ============================================================================
