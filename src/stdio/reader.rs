//! Background tasks draining a server's stdout and stderr.
//!
//! [`run_reader`] feeds stdout chunks through a [`FrameDecoder`] and hands
//! each complete frame to the transport's response queue.
//! [`run_stderr_drain`] surfaces stderr lines as diagnostics and keeps a
//! bounded tail of them for failure payloads. Neither task ever touches the
//! transport's request lock.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::stdio::codec::FrameDecoder;

/// Read chunk size for stdout.
const READ_CHUNK_BYTES: usize = 4096;

/// Pause after a failed read before polling again.
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(20);

/// Consecutive read failures after which the reader gives up.
const MAX_CONSECUTIVE_READ_ERRORS: u32 = 50;

/// Log target for child stderr lines.
pub const STDERR_TARGET: &str = "mcp_deployer::stderr";

// ── Stderr tail ───────────────────────────────────────────────────────────────

/// Bounded, shareable buffer of the most recent stderr lines.
#[derive(Debug, Clone)]
pub struct StderrTail {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl StderrTail {
    /// Create a tail that keeps at most `capacity` lines.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity: capacity.max(1),
        }
    }

    /// Record a line, evicting the oldest once full.
    pub fn push(&self, line: String) {
        let mut lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// All retained lines joined by `\n`, or `None` when nothing was captured.
    #[must_use]
    pub fn snapshot(&self) -> Option<String> {
        let lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        if lines.is_empty() {
            None
        } else {
            Some(lines.iter().map(String::as_str).collect::<Vec<_>>().join("\n"))
        }
    }
}

// ── Stdout reader ─────────────────────────────────────────────────────────────

/// Stdout reader task.
///
/// Reads `stdout` in chunks, extracts frames with `decoder`, and sends each
/// frame through `frame_tx` in arrival order. Returns on EOF, on
/// cancellation, when the receiving side is gone, or after
/// [`MAX_CONSECUTIVE_READ_ERRORS`] failed reads in a row. A single read
/// error only pauses the loop briefly. Returning drops `frame_tx`, which the
/// transport observes as a closed queue.
pub async fn run_reader<R>(
    label: String,
    stdout: R,
    mut decoder: FrameDecoder,
    frame_tx: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin + Send,
{
    let mut stdout = stdout;
    let mut chunk = vec![0_u8; READ_CHUNK_BYTES];
    let mut consecutive_errors = 0_u32;

    loop {
        let read = tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(session = %label, "stdout reader: cancellation received, stopping");
                return;
            }

            read = stdout.read(&mut chunk) => read,
        };

        match read {
            Ok(0) => {
                debug!(
                    session = %label,
                    pending = decoder.pending(),
                    "stdout reader: EOF detected"
                );
                return;
            }
            Ok(n) => {
                consecutive_errors = 0;
                for frame in decoder.append(&chunk[..n]) {
                    debug!(session = %label, preview = %truncate_chars(&frame, 100), "frame received");
                    if frame_tx.send(frame).is_err() {
                        debug!(session = %label, "stdout reader: queue closed, stopping");
                        return;
                    }
                }
            }
            Err(err) => {
                consecutive_errors += 1;
                if consecutive_errors >= MAX_CONSECUTIVE_READ_ERRORS {
                    warn!(session = %label, error = %err, "stdout reader: giving up after repeated read errors");
                    return;
                }
                warn!(session = %label, error = %err, "stdout reader: read error, retrying");
                tokio::time::sleep(READ_ERROR_BACKOFF).await;
            }
        }
    }
}

// ── Stderr drain ──────────────────────────────────────────────────────────────

/// Stderr drain task.
///
/// Logs every stderr line under [`STDERR_TARGET`], truncated to
/// `max_line_chars`, and records it in `tail`. Runs until EOF or
/// cancellation.
pub async fn run_stderr_drain<R>(
    label: String,
    stderr: R,
    tail: StderrTail,
    max_line_chars: usize,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin + Send,
{
    let mut reader = BufReader::new(stderr);
    let mut raw = Vec::new();

    loop {
        raw.clear();
        let read = tokio::select! {
            biased;

            () = cancel.cancelled() => return,

            read = reader.read_until(b'\n', &mut raw) => read,
        };

        match read {
            Ok(0) => return,
            Ok(_) => {
                let text = String::from_utf8_lossy(&raw);
                let line = text.trim_end();
                if line.is_empty() {
                    continue;
                }
                let line = truncate_chars(line, max_line_chars);
                debug!(target: STDERR_TARGET, session = %label, "{line}");
                tail.push(line);
            }
            Err(err) => {
                debug!(session = %label, error = %err, "stderr drain: read error, stopping");
                return;
            }
        }
    }
}

// ── Private helpers ───────────────────────────────────────────────────────────

/// First `max` chars of `text`, with an ellipsis when cut.
pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_owned(),
    }
}
