//! Line framing.
//!
//! Inbound bytes are split on `\n` by [`LineCodec`], which strips the
//! terminator (and a trailing `\r`), enforces a maximum line length, and
//! decodes each line as UTF-8 with invalid sequences replaced by U+FFFD.
//! Outbound lines are written with [`encode_line`].

use bytes::BytesMut;
use thiserror::Error;
use tokio_util::codec::Decoder;

/// Errors produced while reading lines off a connection.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Line exceeds maximum length of {max} bytes")]
    LineTooLong { max: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Newline-delimited decoder that never rejects a line for its encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineCodec {
    max_length: usize,
    /// Bytes already scanned for a terminator in the buffered partial line.
    next_index: usize,
}

impl LineCodec {
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
        }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

/// Builds the inbound line codec.
pub fn line_codec(max_line_length: usize) -> LineCodec {
    LineCodec::new(max_line_length)
}

fn decode_lossy(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = ProtocolError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, ProtocolError> {
        let read_to = buf.len().min(self.max_length.saturating_add(1));

        match buf[self.next_index..read_to].iter().position(|b| *b == b'\n') {
            Some(offset) => {
                let newline = self.next_index + offset;
                self.next_index = 0;
                let line = buf.split_to(newline + 1);
                Ok(Some(decode_lossy(&line[..newline])))
            }
            None if buf.len() > self.max_length => {
                self.next_index = 0;
                Err(ProtocolError::LineTooLong {
                    max: self.max_length,
                })
            }
            None => {
                self.next_index = read_to;
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, ProtocolError> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        if buf.is_empty() {
            return Ok(None);
        }

        // Unterminated final line
        self.next_index = 0;
        let rest = buf.split_to(buf.len());
        Ok(Some(decode_lossy(&rest)))
    }
}

/// Appends the line terminator.
pub fn encode_line(line: &str) -> String {
    let mut framed = String::with_capacity(line.len() + 1);
    framed.push_str(line);
    framed.push('\n');
    framed
}
