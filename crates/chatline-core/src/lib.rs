//! chatline Core - Shared types for the chatline service
//!
//! This crate provides the domain types shared between
//! the server (chatlined) and the peer client (chatline-client).
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod config;
pub mod error;
pub mod session;

// Re-exports for convenience
pub use config::{ClientConfig, ServerConfig, DEFAULT_HOST, DEFAULT_MAX_LINE_LENGTH, DEFAULT_PORT};
pub use error::{ConfigError, DomainError, DomainResult};
pub use session::{Identity, SessionInfo, SessionKey, SessionState};
