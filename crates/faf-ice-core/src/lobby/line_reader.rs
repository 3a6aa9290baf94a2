//! Length-bounded reading of newline-delimited messages.
//!
//! A line longer than the limit is dropped while it streams in, so a peer that
//! never sends a newline cannot make the buffer grow past the limit.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// One line read from the stream.
#[derive(Debug, PartialEq, Eq)]
pub enum Line {
    /// Line contents without the trailing newline.
    Complete(Vec<u8>),
    /// A line over the limit; only its length is kept.
    Oversized(usize),
}

/// Newline-delimited reader holding at most `max_len` bytes of one line.
///
/// `next_line` is cancel safe: partial lines survive in the reader between
/// calls, so it can be polled from `select!`.
#[derive(Debug)]
pub struct LineReader<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
    max_len: usize,
    /// Bytes of the current line dropped so far, once it exceeded the limit.
    dropped: Option<usize>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(reader: R, max_len: usize) -> Self {
        Self {
            reader: BufReader::new(reader),
            buf: Vec::new(),
            max_len,
            dropped: None,
        }
    }

    /// Next line, or `None` at end of stream. A trailing partial line is discarded.
    pub async fn next_line(&mut self) -> std::io::Result<Option<Line>> {
        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                return Ok(None);
            }

            let newline = available.iter().position(|b| *b == b'\n');
            let chunk = &available[..newline.unwrap_or(available.len())];

            match self.dropped.as_mut() {
                Some(dropped) => *dropped += chunk.len(),
                None if self.buf.len() + chunk.len() > self.max_len => {
                    self.dropped = Some(self.buf.len() + chunk.len());
                    self.buf = Vec::new();
                }
                None => self.buf.extend_from_slice(chunk),
            }

            let consumed = newline.map_or(chunk.len(), |i| i + 1);
            self.reader.consume(consumed);

            if newline.is_some() {
                let line = match self.dropped.take() {
                    Some(len) => Line::Oversized(len),
                    None => Line::Complete(std::mem::take(&mut self.buf)),
                };
                return Ok(Some(line));
            }
        }
    }
}
