//! Event emission for front ends.
//!
//! The server core never talks to a UI directly. It reports two things:
//! free-text log lines and roster changes. Both are delivered synchronously
//! from whichever task caused them, so a sink that needs thread affinity must
//! marshal on its own side.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use chatline_core::Identity;

/// Receiver of operator-facing log lines and roster changes.
pub trait EventSink: Send + Sync {
    /// A human-readable log line (connects, traffic, disconnects, errors).
    fn on_log(&self, line: &str);

    /// A session entered (`added == true`) or left the registry.
    fn on_roster_change(&self, identity: &Identity, added: bool);
}

/// Shared sink handle, cloned into every session task.
pub type SharedEventSink = Arc<dyn EventSink>;

/// Sink that writes everything to `tracing` at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn on_log(&self, line: &str) {
        info!(target: "chatlined::log", "{line}");
    }

    fn on_roster_change(&self, identity: &Identity, added: bool) {
        info!(target: "chatlined::roster", identity = %identity, added, "Roster changed");
    }
}

/// Owned form of a sink callback, for channel delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    Log(String),
    RosterAdded(Identity),
    RosterRemoved(Identity),
}

/// Sink that forwards every callback into an unbounded channel.
///
/// Events are dropped silently once the receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ServerEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn on_log(&self, line: &str) {
        let _ = self.tx.send(ServerEvent::Log(line.to_string()));
    }

    fn on_roster_change(&self, identity: &Identity, added: bool) {
        let event = if added {
            ServerEvent::RosterAdded(identity.clone())
        } else {
            ServerEvent::RosterRemoved(identity.clone())
        };
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_sink_delivers_in_order() {
        let (sink, mut rx) = ChannelSink::new();
        sink.on_roster_change(&Identity::new("alice"), true);
        sink.on_log("Client connected: alice");
        sink.on_roster_change(&Identity::new("alice"), false);

        assert_eq!(rx.try_recv().unwrap(), ServerEvent::RosterAdded(Identity::new("alice")));
        assert_eq!(
            rx.try_recv().unwrap(),
            ServerEvent::Log("Client connected: alice".to_string())
        );
        assert_eq!(rx.try_recv().unwrap(), ServerEvent::RosterRemoved(Identity::new("alice")));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_channel_sink_ignores_closed_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        // Must not panic
        sink.on_log("nobody listening");
    }
}
