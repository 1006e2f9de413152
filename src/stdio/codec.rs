//! Newline-delimited frame decoder for server stdout.
//!
//! [`FrameDecoder`] turns an unbounded sequence of byte chunks into discrete
//! text frames. It owns no I/O, so the reader task and the unit tests drive
//! it the same way.
//!
//! # Framing rules
//!
//! - A frame ends at the first `\n`; one trailing `\r` is trimmed.
//! - Empty and whitespace-only lines are skipped.
//! - Each frame is decoded as UTF-8 best-effort: invalid sequences are
//!   dropped, not replaced.
//! - The newline search runs on raw bytes, so a multi-byte character split
//!   across two chunks is reassembled intact.
//! - A line longer than the size limit is dropped whole: once the limit is
//!   crossed, everything up to and including the next `\n` is discarded and
//!   no frame is produced for that line.
//! - After every [`FrameDecoder::append`] the buffer holds no complete frame.

use bytes::{Buf, BytesMut};
use tracing::warn;

/// Default cap on a single unterminated frame: 8 MiB.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

/// Incremental decoder for `\n`-terminated text frames.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    max_frame_bytes: usize,
    /// Inside an oversized line; drop bytes until the next `\n`.
    discarding: bool,
}

impl FrameDecoder {
    /// Create a decoder with the [`DEFAULT_MAX_FRAME_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_frame_bytes(DEFAULT_MAX_FRAME_BYTES)
    }

    /// Create a decoder that discards unterminated data beyond `max_frame_bytes`.
    #[must_use]
    pub fn with_max_frame_bytes(max_frame_bytes: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_frame_bytes,
            discarding: false,
        }
    }

    /// Append a chunk and return every frame it completes, in order.
    pub fn append(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut frames = Vec::new();
        loop {
            let newline = self.buf.iter().position(|&b| b == b'\n');

            if self.discarding {
                match newline {
                    Some(pos) => {
                        self.buf.advance(pos + 1);
                        self.discarding = false;
                        continue;
                    }
                    None => {
                        self.buf.clear();
                        break;
                    }
                }
            }

            let Some(pos) = newline else {
                if self.buf.len() > self.max_frame_bytes {
                    warn!(
                        pending = self.buf.len(),
                        limit = self.max_frame_bytes,
                        "frame exceeds size limit without a newline, discarding line"
                    );
                    self.buf.clear();
                    self.discarding = true;
                }
                break;
            };

            let line = self.buf.split_to(pos);
            self.buf.advance(1);
            if line.len() > self.max_frame_bytes {
                warn!(
                    length = line.len(),
                    limit = self.max_frame_bytes,
                    "frame exceeds size limit, discarding line"
                );
                continue;
            }

            let mut text = decode_lossy(&line);
            if text.ends_with('\r') {
                text.pop();
            }
            if !text.trim().is_empty() {
                frames.push(text);
            }
        }

        frames
    }

    /// Bytes received but not yet terminated by a newline.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode `bytes` as UTF-8, dropping invalid sequences.
fn decode_lossy(bytes: &[u8]) -> String {
    let mut text = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        text.push_str(chunk.valid());
    }
    text
}
