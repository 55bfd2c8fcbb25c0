//! Operator console.
//!
//! Reads operator commands line by line and turns them into dispatcher
//! calls. Bare text is broadcast; slash commands cover the rest:
//!
//! ```text
//! /list                  show connected sessions
//! /to <identity> <text>  send <text> to one session
//! /to "<id>" <text>      same, for identities with spaces
//! /all <text>            send <text> to every session
//! /quit                  stop accepting connections and exit the console
//! /help                  show this list
//! //text                 broadcast a line that starts with '/'
//! ```
//!
//! Sending the sentinel (`bye`, `/to alice bye`) starts a server-initiated
//! disconnect for the recipients.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use chatline_core::Identity;

use crate::dispatcher::Dispatcher;
use crate::registry::RegistryHandle;

pub const HELP_TEXT: &str = "\
Commands:
  /list                  show connected sessions
  /to <identity> <text>  send <text> to one session
  /to \"<id>\" <text>      same, for identities with spaces
  /all <text>            send <text> to every session
  /quit                  stop the server
  /help                  show this help
Any other line is sent to every session.";

// ============================================================================
// Command Types
// ============================================================================

/// A parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Blank input.
    Nothing,

    Broadcast(String),

    Unicast { identity: Identity, body: String },

    List,

    Help,

    Quit,
}

/// Rejected console input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsoleError {
    #[error("Unknown command: /{0} (try /help)")]
    UnknownCommand(String),

    #[error("Usage: {0}")]
    Usage(&'static str),
}

impl ConsoleCommand {
    /// Parses one line of operator input.
    pub fn parse(line: &str) -> Result<Self, ConsoleError> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Ok(Self::Nothing);
        }

        let Some(rest) = line.strip_prefix('/') else {
            return Ok(Self::Broadcast(line.to_string()));
        };

        // "//text" sends "/text" verbatim
        if rest.starts_with('/') {
            return Ok(Self::Broadcast(rest.to_string()));
        }

        let (command, args) = match rest.split_once(char::is_whitespace) {
            Some((command, args)) => (command, args.trim_start()),
            None => (rest, ""),
        };

        match command.to_ascii_lowercase().as_str() {
            "list" | "ls" => Ok(Self::List),
            "help" | "?" => Ok(Self::Help),
            "quit" | "exit" => Ok(Self::Quit),
            "all" => {
                if args.is_empty() {
                    return Err(ConsoleError::Usage("/all <text>"));
                }
                Ok(Self::Broadcast(args.to_string()))
            }
            "to" => match split_recipient(args) {
                Some((identity, body)) if !body.is_empty() => Ok(Self::Unicast {
                    identity: Identity::new(identity),
                    body: body.to_string(),
                }),
                _ => Err(ConsoleError::Usage("/to <identity> <text>")),
            },
            other => Err(ConsoleError::UnknownCommand(other.to_string())),
        }
    }
}

/// Splits `/to` arguments into recipient and body.
///
/// A recipient in double quotes is taken verbatim, spaces included.
fn split_recipient(args: &str) -> Option<(&str, &str)> {
    if let Some(quoted) = args.strip_prefix('"') {
        let (identity, rest) = quoted.split_once('"')?;
        if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
            return None;
        }
        return Some((identity, rest.trim_start()));
    }

    let (identity, body) = args.split_once(char::is_whitespace)?;
    Some((identity, body.trim_start()))
}

// ============================================================================
// Console Loop
// ============================================================================

/// Runs the console until `/quit`, end of input, or cancellation.
///
/// `/quit` cancels `cancel_token`, which also stops the listener.
pub async fn run_console<R, W>(
    input: R,
    mut output: W,
    dispatcher: Dispatcher,
    registry: RegistryHandle,
    cancel_token: CancellationToken,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();

    loop {
        let line = tokio::select! {
            _ = cancel_token.cancelled() => break,
            line = lines.next_line() => line?,
        };

        let Some(line) = line else {
            debug!("Console input closed");
            break;
        };

        let reply = match ConsoleCommand::parse(&line) {
            Ok(ConsoleCommand::Nothing) => continue,
            Ok(ConsoleCommand::Broadcast(body)) => {
                let count = dispatcher.broadcast(&body).await;
                format!("Sent to {count} session(s)")
            }
            Ok(ConsoleCommand::Unicast { identity, body }) => {
                if dispatcher.unicast(&identity, &body).await {
                    format!("Sent to {identity}")
                } else {
                    format!("{identity} is not connected")
                }
            }
            Ok(ConsoleCommand::List) => format_roster(&registry).await,
            Ok(ConsoleCommand::Help) => HELP_TEXT.to_string(),
            Ok(ConsoleCommand::Quit) => {
                cancel_token.cancel();
                break;
            }
            Err(e) => e.to_string(),
        };

        output.write_all(reply.as_bytes()).await?;
        output.write_all(b"\n").await?;
        output.flush().await?;
    }

    Ok(())
}

async fn format_roster(registry: &RegistryHandle) -> String {
    let roster = registry.roster().await;
    if roster.is_empty() {
        return "No sessions connected".to_string();
    }

    let mut out = format!("{} session(s):", roster.len());
    for info in roster {
        out.push_str(&format!(
            "\n  {:<6} {}  connected {}",
            info.key.to_string(),
            info.display_label(),
            info.connected_since()
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::Arc;

    use chatline_core::{SessionInfo, SessionKey};
    use tokio::io::{duplex, AsyncReadExt, BufReader};
    use tokio::sync::mpsc;

    use crate::events::{ChannelSink, SharedEventSink};
    use crate::registry::spawn_registry;
    use crate::server::{session_writer, SessionHandle};

    #[test]
    fn test_parse_bare_text_broadcasts() {
        assert_eq!(
            ConsoleCommand::parse("maintenance"),
            Ok(ConsoleCommand::Broadcast("maintenance".to_string()))
        );
    }

    #[test]
    fn test_parse_blank_is_nothing() {
        assert_eq!(ConsoleCommand::parse("   "), Ok(ConsoleCommand::Nothing));
        assert_eq!(ConsoleCommand::parse("\r\n"), Ok(ConsoleCommand::Nothing));
    }

    #[test]
    fn test_parse_unicast() {
        assert_eq!(
            ConsoleCommand::parse("/to dave hi there"),
            Ok(ConsoleCommand::Unicast {
                identity: Identity::new("dave"),
                body: "hi there".to_string(),
            })
        );
    }

    #[test]
    fn test_parse_unicast_needs_body() {
        assert_eq!(
            ConsoleCommand::parse("/to dave"),
            Err(ConsoleError::Usage("/to <identity> <text>"))
        );
        assert_eq!(
            ConsoleCommand::parse("/to dave   "),
            Err(ConsoleError::Usage("/to <identity> <text>"))
        );
    }

    #[test]
    fn test_parse_unicast_quoted_identity() {
        assert_eq!(
            ConsoleCommand::parse("/to \"alice smith\" hi there"),
            Ok(ConsoleCommand::Unicast {
                identity: Identity::new("alice smith"),
                body: "hi there".to_string(),
            })
        );
        assert_eq!(
            ConsoleCommand::parse("/to \"  alice \" bye"),
            Ok(ConsoleCommand::Unicast {
                identity: Identity::new("  alice "),
                body: "bye".to_string(),
            })
        );
    }

    #[test]
    fn test_parse_unicast_rejects_bad_quoting() {
        let usage = Err(ConsoleError::Usage("/to <identity> <text>"));
        assert_eq!(ConsoleCommand::parse("/to \"alice smith hi"), usage);
        assert_eq!(ConsoleCommand::parse("/to \"alice\"hi"), usage);
        assert_eq!(ConsoleCommand::parse("/to \"alice\""), usage);
    }

    #[test]
    fn test_parse_keywords() {
        assert_eq!(ConsoleCommand::parse("/list"), Ok(ConsoleCommand::List));
        assert_eq!(ConsoleCommand::parse("/HELP"), Ok(ConsoleCommand::Help));
        assert_eq!(ConsoleCommand::parse("/quit"), Ok(ConsoleCommand::Quit));
        assert_eq!(
            ConsoleCommand::parse("/all bye"),
            Ok(ConsoleCommand::Broadcast("bye".to_string()))
        );
    }

    #[test]
    fn test_parse_escaped_slash() {
        assert_eq!(
            ConsoleCommand::parse("//shrug"),
            Ok(ConsoleCommand::Broadcast("/shrug".to_string()))
        );
    }

    #[test]
    fn test_parse_unknown_command() {
        let err = ConsoleCommand::parse("/kick bob").unwrap_err();
        assert_eq!(err, ConsoleError::UnknownCommand("kick".to_string()));
        assert!(err.to_string().contains("/help"));
    }

    async fn run_script(script: &str, registry: RegistryHandle, sink: SharedEventSink) -> String {
        let (console_out, mut reader) = duplex(8192);
        let cancel = CancellationToken::new();

        run_console(
            BufReader::new(script.as_bytes()),
            console_out,
            Dispatcher::new(registry.clone(), sink),
            registry,
            cancel,
        )
        .await
        .unwrap();

        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn test_console_list_and_unicast_miss() {
        let (sink, _events) = ChannelSink::new();
        let sink: SharedEventSink = Arc::new(sink);
        let registry = spawn_registry(Arc::clone(&sink));

        let info = SessionInfo::new(
            SessionKey::new(1),
            Identity::new("bob"),
            SocketAddr::from(([127, 0, 0, 1], 40000)),
        );
        let (control, _control_rx) = mpsc::unbounded_channel();
        registry
            .register(SessionHandle::new(
                info,
                session_writer(tokio::io::sink()),
                control,
            ))
            .await
            .unwrap();

        let out = run_script("/list\n/to dave hi\nhello\n", registry, sink).await;
        assert!(out.contains("1 session(s):"));
        assert!(out.contains("bob (127.0.0.1:40000)"));
        assert!(out.contains("dave is not connected"));
        assert!(out.contains("Sent to 1 session(s)"));
    }

    #[tokio::test]
    async fn test_console_quit_cancels() {
        let (sink, _events) = ChannelSink::new();
        let sink: SharedEventSink = Arc::new(sink);
        let registry = spawn_registry(Arc::clone(&sink));
        let cancel = CancellationToken::new();

        run_console(
            BufReader::new("/quit\n/list\n".as_bytes()),
            tokio::io::sink(),
            Dispatcher::new(registry.clone(), sink),
            registry,
            cancel.clone(),
        )
        .await
        .unwrap();

        assert!(cancel.is_cancelled());
    }
}
