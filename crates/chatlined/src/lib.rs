//! chatline server - accept loop, session registry and message dispatcher
//!
//! This crate provides the server side of the chatline service:
//! - `server` - TCP listener and the per-connection session state machine
//! - `registry` - Session registry actor, indexed by connection and identity
//! - `dispatcher` - Operator broadcast/unicast routing over the registry
//! - `console` - Operator command parsing and the console loop
//! - `events` - Log line and roster change emission for front ends
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       chatlined                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐    │
//! │  │   ChatServer    │     │     RegistryActor           │    │
//! │  │  (TcpListener)  │     │  (session directory owner)  │    │
//! │  └────────┬────────┘     └──────────────┬──────────────┘    │
//! │           │ accept                      ▲                   │
//! │           ▼                             │ register /        │
//! │  ┌─────────────────┐                    │ unregister        │
//! │  │     Session     │────────────────────┘                   │
//! │  │  (per client)   │◀──── writes ───┐                       │
//! │  └────────┬────────┘                │                       │
//! │           │ log / roster   ┌────────┴────────┐              │
//! │           ▼                │   Dispatcher    │◀── console   │
//! │  ┌─────────────────┐       └─────────────────┘              │
//! │  │    EventSink    │                                        │
//! │  └─────────────────┘                                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod console;
pub mod dispatcher;
pub mod events;
pub mod registry;
pub mod server;
