//! Operator message routing.
//!
//! The dispatcher writes raw operator text to sessions found through the
//! registry, bypassing the echo default. When the text is the disconnect
//! sentinel, every recipient is armed to wait for an acknowledgement before
//! the sentinel is written, so the reply can never race the arming.

use futures::future::join_all;
use tracing::debug;

use chatline_core::Identity;
use chatline_protocol::is_sentinel_command;

use crate::events::SharedEventSink;
use crate::registry::RegistryHandle;
use crate::server::SessionHandle;

/// Broadcast and unicast over the session registry.
#[derive(Clone)]
pub struct Dispatcher {
    registry: RegistryHandle,
    events: SharedEventSink,
}

impl Dispatcher {
    pub fn new(registry: RegistryHandle, events: SharedEventSink) -> Self {
        Self { registry, events }
    }

    /// Writes `body` to every session registered at call time.
    ///
    /// Best effort: a failed write is logged and does not stop delivery to
    /// the others. Returns the number of sessions written.
    pub async fn broadcast(&self, body: &str) -> usize {
        let sessions = self.registry.snapshot_all().await;
        self.events.on_log(&format!("[Server to ALL]: {body}"));

        let results = join_all(sessions.iter().map(|session| self.deliver(session, body))).await;
        results.into_iter().filter(|delivered| *delivered).count()
    }

    /// Writes `body` to the session that owns `identity`.
    ///
    /// An unknown identity is a silent no-op. Returns whether a write happened.
    pub async fn unicast(&self, identity: &Identity, body: &str) -> bool {
        let Some(session) = self.registry.lookup(identity).await else {
            debug!(identity = %identity, "Unicast target not connected");
            return false;
        };

        self.events
            .on_log(&format!("[Server to {identity}]: {body}"));
        self.deliver(&session, body).await
    }

    async fn deliver(&self, session: &SessionHandle, body: &str) -> bool {
        if is_sentinel_command(body) && !session.arm_disconnect() {
            debug!(key = %session.key(), "Session already finished, skipping");
            return false;
        }

        match session.send_line(body).await {
            Ok(()) => true,
            Err(e) => {
                self.events.on_log(&format!(
                    "Failed to send to {}: {e}",
                    session.identity()
                ));
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::Arc;

    use chatline_core::{SessionInfo, SessionKey};
    use tokio::io::{duplex, AsyncBufReadExt, BufReader, DuplexStream};
    use tokio::sync::mpsc;

    use crate::events::{ChannelSink, ServerEvent};
    use crate::registry::spawn_registry;
    use crate::server::{session_writer, SessionControl};

    struct Peer {
        reader: BufReader<DuplexStream>,
        control: mpsc::UnboundedReceiver<SessionControl>,
    }

    impl Peer {
        async fn recv(&mut self) -> String {
            let mut line = String::new();
            self.reader.read_line(&mut line).await.unwrap();
            line.trim_end_matches('\n').to_string()
        }
    }

    async fn register_peer(registry: &RegistryHandle, key: u64, identity: &str) -> Peer {
        let (server_side, peer_side) = duplex(1024);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let info = SessionInfo::new(
            SessionKey::new(key),
            Identity::new(identity),
            SocketAddr::from(([127, 0, 0, 1], 40000)),
        );
        registry
            .register(SessionHandle::new(info, session_writer(server_side), control_tx))
            .await
            .unwrap();

        Peer {
            reader: BufReader::new(peer_side),
            control: control_rx,
        }
    }

    fn setup() -> (Dispatcher, RegistryHandle, mpsc::UnboundedReceiver<ServerEvent>) {
        let (sink, events) = ChannelSink::new();
        let sink: SharedEventSink = Arc::new(sink);
        let registry = spawn_registry(Arc::clone(&sink));
        (Dispatcher::new(registry.clone(), sink), registry, events)
    }

    fn logs(events: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<String> {
        let mut logs = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let ServerEvent::Log(line) = event {
                logs.push(line);
            }
        }
        logs
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_session() {
        let (dispatcher, registry, mut events) = setup();
        let mut bob = register_peer(&registry, 1, "bob").await;
        let mut carol = register_peer(&registry, 2, "carol").await;

        assert_eq!(dispatcher.broadcast("maintenance").await, 2);
        assert_eq!(bob.recv().await, "maintenance");
        assert_eq!(carol.recv().await, "maintenance");

        // Not a sentinel, nobody armed
        assert!(bob.control.try_recv().is_err());
        assert!(logs(&mut events).contains(&"[Server to ALL]: maintenance".to_string()));
    }

    #[tokio::test]
    async fn test_broadcast_with_no_sessions() {
        let (dispatcher, _registry, _events) = setup();
        assert_eq!(dispatcher.broadcast("anyone?").await, 0);
    }

    #[tokio::test]
    async fn test_unicast_targets_one_session() {
        let (dispatcher, registry, mut events) = setup();
        let mut bob = register_peer(&registry, 1, "bob").await;
        let _carol = register_peer(&registry, 2, "carol").await;

        assert!(dispatcher.unicast(&Identity::new("bob"), "psst").await);
        assert_eq!(bob.recv().await, "psst");
        assert!(logs(&mut events).contains(&"[Server to bob]: psst".to_string()));
    }

    #[tokio::test]
    async fn test_unicast_unknown_identity_is_silent() {
        let (dispatcher, registry, mut events) = setup();
        let _bob = register_peer(&registry, 1, "bob").await;

        assert!(!dispatcher.unicast(&Identity::new("dave"), "hi").await);
        assert!(logs(&mut events).is_empty());
    }

    #[tokio::test]
    async fn test_sentinel_arms_before_write() {
        let (dispatcher, registry, _events) = setup();
        let mut bob = register_peer(&registry, 1, "bob").await;

        assert!(dispatcher.unicast(&Identity::new("bob"), " Bye ").await);
        assert_eq!(
            bob.control.try_recv().unwrap(),
            SessionControl::AwaitDisconnectAck
        );
        assert_eq!(bob.recv().await, " Bye ");
    }

    #[tokio::test]
    async fn test_sentinel_skips_finished_session() {
        let (dispatcher, registry, _events) = setup();
        let bob = register_peer(&registry, 1, "bob").await;
        drop(bob);

        assert_eq!(dispatcher.broadcast("bye").await, 0);
    }
}
