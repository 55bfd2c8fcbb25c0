//! Session registry using Actor pattern.
//!
//! The registry is the directory of every session that has completed its
//! handshake and not yet closed. It receives commands via a tokio mpsc
//! channel, so session tasks and the dispatcher never contend on a lock.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐  Register/Unregister  ┌─────────────────┐  roster add/remove  ┌───────────┐
//! │  Session tasks  │──────────────────────▶│  RegistryActor  │────────────────────▶│ EventSink │
//! └─────────────────┘                       └─────────────────┘                     └───────────┘
//!                                                    ▲
//!                           Lookup/SnapshotAll       │
//! ┌─────────────────┐                                │
//! │   Dispatcher    │────────────────────────────────┘
//! └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All operations in this module follow the panic-free policy:
//! - No `.unwrap()` or `.expect()` in production code
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

use tokio::sync::mpsc;

use crate::events::SharedEventSink;

mod actor;
mod commands;
mod handle;

pub use actor::RegistryActor;
pub use commands::{RegistryCommand, RegistryError};
pub use handle::RegistryHandle;

/// Channel buffer size
const COMMAND_BUFFER: usize = 256;

/// Spawn the registry actor and return a handle for interaction.
///
/// Roster changes are reported to `events` from the actor task.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use chatlined::events::TracingSink;
/// use chatlined::registry::spawn_registry;
///
/// #[tokio::main]
/// async fn main() {
///     let handle = spawn_registry(Arc::new(TracingSink));
///     let sessions = handle.snapshot_all().await;
///     assert!(sessions.is_empty());
/// }
/// ```
pub fn spawn_registry(events: SharedEventSink) -> RegistryHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);

    let actor = RegistryActor::new(cmd_rx, events);
    tokio::spawn(actor.run());

    RegistryHandle::new(cmd_tx)
}
