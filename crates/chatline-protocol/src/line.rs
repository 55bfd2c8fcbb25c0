//! Protocol literals and line classification.
//!
//! The disconnect sentinel is used for both the request and the
//! acknowledgement, so the content of a line alone cannot say which one it
//! is. Each side tracks whether it initiated the disconnect.

use chatline_core::Identity;

/// Disconnect token, shared by request and acknowledgement.
pub const SENTINEL: &str = "bye";

/// Prefix of the server's reply to the identity line.
pub const GREETING_PREFIX: &str = "Hello ";

/// Prefix of the server's default reply to a chat line.
pub const ECHO_PREFIX: &str = "Echo: ";

/// `Hello <identity>`
pub fn greeting(identity: &Identity) -> String {
    format!("{GREETING_PREFIX}{identity}")
}

/// `Echo: <line>`
pub fn echo(line: &str) -> String {
    format!("{ECHO_PREFIX}{line}")
}

/// Extracts the identity from a greeting line, if it is one.
pub fn parse_greeting(line: &str) -> Option<&str> {
    line.strip_prefix(GREETING_PREFIX)
}

/// Literal match, as applied to lines read off the wire.
#[must_use]
pub fn is_sentinel_line(line: &str) -> bool {
    line == SENTINEL
}

/// Trimmed, case-insensitive match, as applied to operator or user input
/// and to the acknowledgement of a server-initiated disconnect.
#[must_use]
pub fn is_sentinel_command(text: &str) -> bool {
    text.trim().eq_ignore_ascii_case(SENTINEL)
}

/// What an `Active` session does with a received line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundLine<'a> {
    /// The peer asked to disconnect.
    DisconnectRequest,
    /// Anything else. Echoed back by default.
    Chat(&'a str),
}

impl<'a> InboundLine<'a> {
    pub fn classify(line: &'a str) -> Self {
        if is_sentinel_line(line) {
            InboundLine::DisconnectRequest
        } else {
            InboundLine::Chat(line)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greeting() {
        assert_eq!(greeting(&Identity::new("alice")), "Hello alice");
        assert_eq!(greeting(&Identity::new("")), "Hello ");
    }

    #[test]
    fn test_parse_greeting() {
        assert_eq!(parse_greeting("Hello alice"), Some("alice"));
        assert_eq!(parse_greeting("Echo: Hello alice"), None);
    }

    #[test]
    fn test_echo() {
        assert_eq!(echo("ping"), "Echo: ping");
        assert_eq!(echo(""), "Echo: ");
    }

    #[test]
    fn test_wire_match_is_literal() {
        assert!(is_sentinel_line("bye"));
        assert!(!is_sentinel_line("BYE"));
        assert!(!is_sentinel_line(" bye"));
        assert!(!is_sentinel_line("bye "));
    }

    #[test]
    fn test_command_match_is_lenient() {
        assert!(is_sentinel_command("bye"));
        assert!(is_sentinel_command("  ByE \t"));
        assert!(!is_sentinel_command("goodbye"));
        assert!(!is_sentinel_command("by e"));
    }

    #[test]
    fn test_classify() {
        assert_eq!(InboundLine::classify("bye"), InboundLine::DisconnectRequest);
        assert_eq!(InboundLine::classify("Bye"), InboundLine::Chat("Bye"));
        assert_eq!(InboundLine::classify("ping"), InboundLine::Chat("ping"));
    }
}
