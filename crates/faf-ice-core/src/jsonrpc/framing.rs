//! Brace-depth framing for JSON-RPC over a raw byte stream.
//!
//! The ICE adapter writes JSON objects back to back with no length prefix or
//! delimiter. A frame ends where the nesting depth of the first top-level
//! object returns to zero. Braces inside string literals are ignored, including
//! escaped quotes:
//!
//! ```text
//! {"a":"}{"}{"method":"onIceMsg",...}
//! ^-------^ first frame
//! ```
//!
//! Corrupt input is never partially recovered: the whole buffer is dropped and
//! the caller gets a [`FramingError`].

use bytes::{Buf, BytesMut};
use serde_json::Value;
use thiserror::Error;

/// Upper bound for a single buffered, still incomplete message.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Unrecoverable framing corruption. The buffer has already been cleared.
#[derive(Debug, Error)]
pub enum FramingError {
    #[error("expected '{{' at start of message, found {found:?}")]
    NotAnObject { found: char },

    #[error("buffered message exceeds {} bytes", MAX_FRAME_SIZE)]
    TooLarge,

    #[error("invalid JSON in complete frame: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Accumulates received bytes and yields complete JSON objects.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: BytesMut,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of buffered bytes not yet consumed by a frame.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Extract the next complete top-level object.
    ///
    /// Returns `Ok(None)` when more bytes are needed. Whitespace between
    /// objects is skipped.
    pub fn next_frame(&mut self) -> Result<Option<Value>, FramingError> {
        let leading = self
            .buf
            .iter()
            .take_while(|b| b.is_ascii_whitespace())
            .count();
        self.buf.advance(leading);

        let Some(&first) = self.buf.first() else {
            return Ok(None);
        };
        if first != b'{' {
            self.buf.clear();
            return Err(FramingError::NotAnObject {
                found: first as char,
            });
        }

        match find_frame_end(&self.buf) {
            Some(end) => {
                let frame = self.buf.split_to(end + 1);
                match serde_json::from_slice(&frame) {
                    Ok(value) => Ok(Some(value)),
                    Err(e) => {
                        self.buf.clear();
                        Err(FramingError::InvalidJson(e))
                    }
                }
            }
            None if self.buf.len() > MAX_FRAME_SIZE => {
                self.buf.clear();
                Err(FramingError::TooLarge)
            }
            None => Ok(None),
        }
    }
}

/// Index of the brace closing the object that starts at `buf[0]`.
///
/// Multi-byte UTF-8 sequences never contain ASCII bytes, so scanning bytes is
/// equivalent to scanning characters here.
fn find_frame_end(buf: &[u8]) -> Option<usize> {
    let mut depth: usize = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in buf.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                // depth >= 1 here: buf[0] is '{' and we return as soon as it closes
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }

    None
}
