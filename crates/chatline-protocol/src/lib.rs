//! chatline Protocol - Line-delimited wire protocol
//!
//! Every message is one UTF-8 line terminated by `\n`; invalid UTF-8 is
//! decoded lossily rather than rejected. This crate holds the
//! protocol literals, the helpers that classify inbound lines, and the
//! codec used to split a byte stream into lines.

pub mod codec;
pub mod line;

pub use codec::{encode_line, line_codec, LineCodec, ProtocolError};
pub use line::{
    echo, greeting, is_sentinel_command, is_sentinel_line, parse_greeting, InboundLine,
    ECHO_PREFIX, GREETING_PREFIX, SENTINEL,
};
