//! Session domain entities and value objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

use crate::error::{DomainError, DomainResult};

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Name a peer announces as the first line of its connection.
///
/// Not validated: an empty or duplicate identity is accepted as-is and
/// carried verbatim into the registry and the greeting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Creates a new Identity from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the peer sent an empty first line.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Identity {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Connection number assigned by the listener in accept order.
///
/// Unlike [`Identity`] this is unique per connection, so it is what the
/// registry uses to tell two sessions with the same name apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(u64);

impl SessionKey {
    pub fn new(n: u64) -> Self {
        Self(n)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ============================================================================
// Session State Machine
// ============================================================================

/// Protocol state of a single connection.
///
/// ```text
/// Handshaking ──identity──▶ Active ──sentinel written──▶ DisconnectPending
///      │                      │                                 │
///      └────── EOF ───────────┴──── sentinel / EOF / error ─────┴──▶ Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Waiting for the first line (the peer's identity).
    #[default]
    Handshaking,
    /// Registered; lines are echoed or trigger the disconnect handshake.
    Active,
    /// The disconnect sentinel was sent to the peer; one more line is awaited.
    DisconnectPending,
    /// Terminal. Connection released and registry entry removed.
    Closed,
}

impl SessionState {
    /// Returns whether moving from `self` to `next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Handshaking, Active)
                | (Handshaking, Closed)
                | (Active, DisconnectPending)
                | (Active, Closed)
                | (DisconnectPending, Closed)
        )
    }

    /// Moves to `next`, rejecting transitions the state machine forbids.
    pub fn transition(&mut self, next: SessionState) -> DomainResult<()> {
        if !self.can_transition_to(next) {
            return Err(DomainError::InvalidTransition {
                from: *self,
                to: next,
            });
        }
        *self = next;
        Ok(())
    }

    /// Returns true once the session has been torn down.
    #[must_use]
    pub fn is_closed(self) -> bool {
        self == SessionState::Closed
    }

    /// Short label for logs.
    pub fn label(self) -> &'static str {
        match self {
            SessionState::Handshaking => "handshaking",
            SessionState::Active => "active",
            SessionState::DisconnectPending => "disconnect-pending",
            SessionState::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================================================
// Roster View
// ============================================================================

/// Read-only description of a registered session, used for roster listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub key: SessionKey,
    pub identity: Identity,
    pub remote_endpoint: SocketAddr,
    pub connected_at: DateTime<Utc>,
}

impl SessionInfo {
    pub fn new(key: SessionKey, identity: Identity, remote_endpoint: SocketAddr) -> Self {
        Self {
            key,
            identity,
            remote_endpoint,
            connected_at: Utc::now(),
        }
    }

    /// Identity plus endpoint, e.g. `alice (127.0.0.1:50312)`.
    pub fn display_label(&self) -> String {
        format!("{} ({})", self.identity, self.remote_endpoint)
    }

    /// How long ago the handshake completed, in compact form.
    pub fn connected_since(&self) -> String {
        format_duration(Utc::now() - self.connected_at)
    }
}

/// Formats a duration for human-readable display.
fn format_duration(duration: chrono::Duration) -> String {
    let secs = duration.num_seconds();
    if secs < 0 {
        return "now".to_string();
    }
    if secs < 60 {
        format!("{secs}s ago")
    } else if secs < 3600 {
        let mins = secs / 60;
        format!("{mins}m ago")
    } else if secs < 86400 {
        let hours = secs / 3600;
        format!("{hours}h ago")
    } else {
        let days = secs / 86400;
        format!("{days}d ago")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_addr() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 40000))
    }

    #[test]
    fn test_identity_accepts_empty() {
        let id = Identity::new("");
        assert!(id.is_empty());
        assert_eq!(id.to_string(), "");
    }

    #[test]
    fn test_identity_preserves_whitespace() {
        let id = Identity::from("  alice ");
        assert_eq!(id.as_str(), "  alice ");
    }

    #[test]
    fn test_session_key_ordering() {
        assert!(SessionKey::new(1) < SessionKey::new(2));
        assert_eq!(SessionKey::new(7).to_string(), "#7");
    }

    #[test]
    fn test_state_happy_path() {
        let mut state = SessionState::default();
        assert_eq!(state, SessionState::Handshaking);
        state.transition(SessionState::Active).unwrap();
        state.transition(SessionState::DisconnectPending).unwrap();
        state.transition(SessionState::Closed).unwrap();
        assert!(state.is_closed());
    }

    #[test]
    fn test_state_closed_is_terminal() {
        let mut state = SessionState::Closed;
        for next in [
            SessionState::Handshaking,
            SessionState::Active,
            SessionState::DisconnectPending,
            SessionState::Closed,
        ] {
            assert!(state.transition(next).is_err(), "closed -> {next} must fail");
        }
    }

    #[test]
    fn test_state_cannot_skip_handshake() {
        let mut state = SessionState::Handshaking;
        let err = state.transition(SessionState::DisconnectPending).unwrap_err();
        assert_eq!(
            err,
            DomainError::InvalidTransition {
                from: SessionState::Handshaking,
                to: SessionState::DisconnectPending,
            }
        );
        assert_eq!(state, SessionState::Handshaking);
    }

    #[test]
    fn test_pending_cannot_return_to_active() {
        assert!(!SessionState::DisconnectPending.can_transition_to(SessionState::Active));
    }

    #[test]
    fn test_display_label() {
        let info = SessionInfo::new(SessionKey::new(1), Identity::new("alice"), test_addr());
        assert_eq!(info.display_label(), "alice (127.0.0.1:40000)");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(chrono::Duration::seconds(-5)), "now");
        assert_eq!(format_duration(chrono::Duration::seconds(42)), "42s ago");
        assert_eq!(format_duration(chrono::Duration::seconds(125)), "2m ago");
        assert_eq!(format_duration(chrono::Duration::seconds(7200)), "2h ago");
        assert_eq!(format_duration(chrono::Duration::seconds(172_800)), "2d ago");
    }
}
