//! Registry actor - owns the session directory and processes commands.
//!
//! The RegistryActor is the single owner of registry state. It receives
//! commands via an mpsc channel and reports roster changes to the event sink.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Reply send failures are ignored (the caller stopped waiting)

use std::collections::{BTreeMap, HashMap};

use tokio::sync::mpsc;
use tracing::{debug, info};

use chatline_core::{Identity, SessionInfo, SessionKey};

use super::commands::RegistryCommand;
use crate::events::SharedEventSink;
use crate::server::SessionHandle;

/// The registry actor - owns all session entries.
///
/// # Ownership
///
/// - `sessions`: every live session keyed by connection number. A `BTreeMap`
///   so snapshots come out in connection-arrival order.
/// - `by_identity`: identity → owning session key. Last registration wins.
///   Empty identities are never indexed.
///
/// # Thread Safety
///
/// The actor runs in a single task and processes commands sequentially.
/// Snapshots are copies, so callers can iterate them while the registry
/// keeps changing.
pub struct RegistryActor {
    /// Command receiver
    receiver: mpsc::Receiver<RegistryCommand>,

    /// Broadcast set
    sessions: BTreeMap<SessionKey, SessionHandle>,

    /// Unicast index
    by_identity: HashMap<Identity, SessionKey>,

    /// Roster change reporting
    events: SharedEventSink,
}

impl RegistryActor {
    pub fn new(receiver: mpsc::Receiver<RegistryCommand>, events: SharedEventSink) -> Self {
        Self {
            receiver,
            sessions: BTreeMap::new(),
            by_identity: HashMap::new(),
            events,
        }
    }

    /// Runs the actor event loop.
    ///
    /// Processes commands until the channel closes (all handles dropped).
    pub async fn run(mut self) {
        info!("Registry actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!(sessions = self.sessions.len(), "Registry actor stopped");
    }

    /// Dispatches a command to the appropriate handler.
    fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Register {
                session,
                respond_to,
            } => {
                let displaced = self.handle_register(*session);
                // Ignore send error - caller may have dropped the receiver
                let _ = respond_to.send(displaced);
            }
            RegistryCommand::Unregister { key, respond_to } => {
                let removed = self.handle_unregister(key);
                let _ = respond_to.send(removed);
            }
            RegistryCommand::Lookup {
                identity,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_lookup(&identity));
            }
            RegistryCommand::SnapshotAll { respond_to } => {
                let _ = respond_to.send(self.sessions.values().cloned().collect());
            }
            RegistryCommand::Roster { respond_to } => {
                let roster: Vec<SessionInfo> =
                    self.sessions.values().map(|s| s.info().clone()).collect();
                let _ = respond_to.send(roster);
            }
        }
    }

    fn handle_register(&mut self, session: SessionHandle) -> Option<SessionKey> {
        let key = session.key();
        let identity = session.identity().clone();

        let displaced = if identity.is_empty() {
            None
        } else {
            self.by_identity.insert(identity.clone(), key)
        };

        if let Some(previous) = displaced {
            debug!(
                identity = %identity,
                previous = %previous,
                key = %key,
                "Identity collision, last registration wins"
            );
        }

        self.sessions.insert(key, session);
        debug!(key = %key, identity = %identity, total = self.sessions.len(), "Session registered");

        self.events.on_roster_change(&identity, true);
        displaced
    }

    fn handle_unregister(&mut self, key: SessionKey) -> bool {
        let Some(session) = self.sessions.remove(&key) else {
            return false;
        };

        let identity = session.identity();
        if self.by_identity.get(identity) == Some(&key) {
            self.by_identity.remove(identity);
        }

        debug!(key = %key, identity = %identity, total = self.sessions.len(), "Session unregistered");

        self.events.on_roster_change(identity, false);
        true
    }

    fn handle_lookup(&self, identity: &Identity) -> Option<SessionHandle> {
        let key = self.by_identity.get(identity)?;
        self.sessions.get(key).cloned()
    }

    /// Returns the number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
