//! chatline client - Library modules
//!
//! This library provides the peer side of the chatline protocol.
//!
//! # Architecture
//!
//! The client uses an event-driven architecture with two tasks:
//!
//! 1. **Receive Task**: Reads server lines, answers disconnect requests, and
//!    forwards everything else as [`ClientEvent`]s
//! 2. **Front End**: Reads user input, calls [`ChatClient::send`], and renders
//!    events
//!
//! The receive task always finishes with [`ClientEvent::Closed`].

pub mod client;
pub mod error;
pub mod input;

// Re-export commonly used types
pub use client::{ChatClient, ClientEvent};
pub use error::{ClientError, Result};
