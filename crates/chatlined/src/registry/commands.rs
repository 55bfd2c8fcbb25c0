//! Registry actor commands and errors.
//!
//! This module defines the message types for communicating with the `RegistryActor`:
//! - `RegistryCommand`: Commands sent to the actor
//! - `RegistryError`: Errors that can occur during registry operations
//!
//! All types are designed for async message passing and follow the panic-free policy.

use chatline_core::{Identity, SessionInfo, SessionKey};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::server::SessionHandle;

// ============================================================================
// Registry Commands
// ============================================================================

/// Commands sent to the registry actor.
///
/// Each command uses a oneshot channel for the response, enabling
/// request-response patterns in async code without blocking.
#[derive(Debug)]
pub enum RegistryCommand {
    /// Add a session that completed its handshake.
    ///
    /// Never fails. If another session already owns the identity, the
    /// lookup entry is overwritten and the displaced key is returned.
    Register {
        /// Handle of the new session (boxed to keep the enum small)
        session: Box<SessionHandle>,
        /// Channel to send the displaced session key, if any
        respond_to: oneshot::Sender<Option<SessionKey>>,
    },

    /// Remove a session.
    ///
    /// Always removed from the broadcast set; removed from the identity
    /// index only if the index still points at this session.
    Unregister {
        /// Key of the session to remove
        key: SessionKey,
        /// Channel to send whether the session was present
        respond_to: oneshot::Sender<bool>,
    },

    /// Find the session currently owning an identity.
    Lookup {
        identity: Identity,
        respond_to: oneshot::Sender<Option<SessionHandle>>,
    },

    /// Point-in-time copy of every live session, in connection order.
    SnapshotAll {
        respond_to: oneshot::Sender<Vec<SessionHandle>>,
    },

    /// Roster entries for display, in connection order.
    Roster {
        respond_to: oneshot::Sender<Vec<SessionInfo>>,
    },
}

// ============================================================================
// Registry Errors
// ============================================================================

/// Errors that can occur during registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The response channel was closed before receiving a response.
    ///
    /// This typically indicates the actor was shut down.
    #[error("response channel closed")]
    ChannelClosed,
}
