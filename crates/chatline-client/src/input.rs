//! Terminal input and output for the chatline client.
//!
//! Maps stdin lines to [`Input`] actions and [`ClientEvent`]s to the text
//! shown to the user.

use crate::client::ClientEvent;

/// What a line typed by the user asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Blank line.
    None,

    /// Send the text as a chat line.
    Send(String),

    /// Disconnect and exit.
    Quit,
}

impl Input {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        match line {
            "" => Input::None,
            "/quit" | "/exit" => Input::Quit,
            text => Input::Send(text.to_string()),
        }
    }
}

/// Line to print for an event, if any.
pub fn render_event(event: &ClientEvent) -> Option<String> {
    match event {
        ClientEvent::Greeted(identity) => Some(format!("Connected to server using userid: {identity}")),
        ClientEvent::Message(line) => Some(format!("Received: {line}")),
        ClientEvent::DisconnectRequested => {
            Some("Received disconnect request. Sent ACK and disconnecting...".to_string())
        }
        ClientEvent::DisconnectAcknowledged => {
            Some("Received disconnect ACK. Disconnecting...".to_string())
        }
        ClientEvent::ConnectionLost(reason) => Some(format!("Connection lost: {reason}")),
        ClientEvent::Closed => Some("Disconnected.".to_string()),
    }
}
