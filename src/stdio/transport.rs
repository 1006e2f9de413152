//! Duplex frame transport over a server process's stdio.
//!
//! A [`FrameTransport`] is bound 1:1 to a running server. Starting it spawns
//! two background tasks: the stdout reader, which pushes decoded frames onto
//! an unbounded queue, and the stderr drain. The foreground path writes one
//! JSON frame at a time under an exclusive lock and then waits, with a
//! timeout, for the next queued frame as its reply.
//!
//! Replies are paired with requests by arrival order, not by id. That is
//! sound only because the lock allows a single outstanding request per
//! transport and the server is assumed to answer in order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::LaunchConfig;
use crate::stdio::codec::{FrameDecoder, DEFAULT_MAX_FRAME_BYTES};
use crate::stdio::message::{JsonRpcNotification, JsonRpcRequest};
use crate::stdio::reader::{run_reader, run_stderr_drain, StderrTail};
use crate::{AppError, Result};

/// Non-blocking liveness check for the process behind a transport.
pub trait ProcessStatus: Send + Sync {
    /// Describe how the process exited, or `None` while it is still running.
    fn exit_description(&self) -> Option<String>;
}

/// Limits applied to the background tasks of a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportOptions {
    /// Largest unterminated stdout frame kept in memory.
    pub max_frame_bytes: usize,
    /// Stderr lines are truncated to this many chars.
    pub stderr_line_chars: usize,
    /// Number of stderr lines kept for diagnostics.
    pub stderr_tail_lines: usize,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            stderr_line_chars: 300,
            stderr_tail_lines: 50,
        }
    }
}

impl From<&LaunchConfig> for TransportOptions {
    fn from(config: &LaunchConfig) -> Self {
        Self {
            max_frame_bytes: config.max_frame_bytes,
            stderr_line_chars: config.stderr_line_chars,
            stderr_tail_lines: config.stderr_tail_lines,
        }
    }
}

/// One frame received in reply to a request.
///
/// Servers are not obliged to answer with JSON, so a line that fails to
/// decode is still a successful reply, carried as [`Reply::Text`].
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// The line decoded as JSON.
    Json {
        /// Decoded value.
        value: Value,
        /// Line exactly as received.
        raw: String,
    },
    /// The line was not valid JSON.
    Text(String),
}

impl Reply {
    /// Classify a received line.
    #[must_use]
    pub fn from_raw(raw: String) -> Self {
        match serde_json::from_str::<Value>(&raw) {
            Ok(value) => Self::Json { value, raw },
            Err(_) => Self::Text(raw),
        }
    }

    /// The line exactly as received.
    #[must_use]
    pub fn raw(&self) -> &str {
        match self {
            Self::Json { raw, .. } | Self::Text(raw) => raw,
        }
    }

    /// The decoded value, when the line was JSON.
    #[must_use]
    pub fn json(&self) -> Option<&Value> {
        match self {
            Self::Json { value, .. } => Some(value),
            Self::Text(_) => None,
        }
    }

    /// The `result` member of a JSON-RPC success reply.
    #[must_use]
    pub fn result(&self) -> Option<&Value> {
        self.json().and_then(|value| value.get("result"))
    }

    /// The `error` member of a JSON-RPC error reply.
    #[must_use]
    pub fn error(&self) -> Option<&Value> {
        self.json()
            .and_then(|value| value.get("error"))
            .filter(|error| !error.is_null())
    }

    /// Human-readable message of a JSON-RPC error reply.
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        self.error().map(|error| {
            error
                .get("message")
                .and_then(Value::as_str)
                .map_or_else(|| error.to_string(), str::to_owned)
        })
    }
}

/// Foreground half of the transport; only reachable under the request lock.
struct Channel {
    stdin: Box<dyn AsyncWrite + Send + Unpin>,
    frames: mpsc::UnboundedReceiver<String>,
}

/// Request/response transport bound to one server process.
pub struct FrameTransport {
    label: String,
    status: Arc<dyn ProcessStatus>,
    channel: Mutex<Channel>,
    next_id: AtomicU64,
    stderr_tail: StderrTail,
    cancel: CancellationToken,
}

impl std::fmt::Debug for FrameTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameTransport")
            .field("label", &self.label)
            .field("next_id", &self.next_id)
            .finish_non_exhaustive()
    }
}

impl FrameTransport {
    /// Bind a transport to a process's stdio and start its background tasks.
    ///
    /// Must be called from within a tokio runtime. The reader and stderr
    /// drain run until EOF on their stream or until the transport is shut
    /// down or dropped.
    pub fn start<W, R, E>(
        label: impl Into<String>,
        stdin: W,
        stdout: R,
        stderr: E,
        status: Arc<dyn ProcessStatus>,
        options: &TransportOptions,
    ) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
        R: AsyncRead + Send + Unpin + 'static,
        E: AsyncRead + Send + Unpin + 'static,
    {
        let label = label.into();
        let cancel = CancellationToken::new();
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let stderr_tail = StderrTail::new(options.stderr_tail_lines);

        tokio::spawn(run_reader(
            label.clone(),
            stdout,
            FrameDecoder::with_max_frame_bytes(options.max_frame_bytes),
            frame_tx,
            cancel.child_token(),
        ));
        tokio::spawn(run_stderr_drain(
            label.clone(),
            stderr,
            stderr_tail.clone(),
            options.stderr_line_chars,
            cancel.child_token(),
        ));
        debug!(session = %label, "transport started");

        Self {
            label,
            status,
            channel: Mutex::new(Channel {
                stdin: Box::new(stdin),
                frames: frame_rx,
            }),
            next_id: AtomicU64::new(1),
            stderr_tail,
            cancel,
        }
    }

    /// Label used in logs and error messages.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Recent stderr output of the process, if it wrote any.
    #[must_use]
    pub fn stderr_tail(&self) -> Option<String> {
        self.stderr_tail.snapshot()
    }

    /// Allocate the next JSON-RPC request id.
    pub fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Write a notification frame; no reply is awaited.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if serialisation or the write fails.
    pub async fn send_notification(&self, payload: &Value) -> Result<()> {
        let mut channel = self.channel.lock().await;
        write_frame(&mut channel.stdin, payload)
            .await
            .map_err(|e| AppError::Transport(format!("{}: notification write failed: {e}", self.label)))?;
        debug!(session = %self.label, method = method_of(payload), "notification sent");
        Ok(())
    }

    /// Write a request frame and wait up to `timeout` for the next reply.
    ///
    /// Under the request lock: refuses to write when the process has exited,
    /// discards frames left over from an earlier timed-out request, writes
    /// the frame, then takes the next frame from the queue. A timeout never
    /// kills the process; the session stays usable.
    ///
    /// # Errors
    ///
    /// - `AppError::ProcessExited` — the process had exited before the write,
    ///   or its stdout closed while waiting and the process has exited.
    /// - `AppError::Transport` — the write to stdin failed, or the response
    ///   queue closed while the process is still running. The queue closes
    ///   when stdout reaches EOF or the reader gives up after repeated read
    ///   errors; either way no further reply can arrive on this transport.
    /// - `AppError::Timeout` — no frame arrived within `timeout`.
    pub async fn send_request(&self, payload: &Value, timeout: Duration) -> Result<Reply> {
        let method = method_of(payload);
        let mut channel = self.channel.lock().await;

        if let Some(exit) = self.status.exit_description() {
            return Err(AppError::ProcessExited(format!("{}: {exit}", self.label)));
        }

        let mut stale = 0_usize;
        while channel.frames.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            debug!(session = %self.label, stale, "discarded stale frames before request");
        }

        write_frame(&mut channel.stdin, payload)
            .await
            .map_err(|e| AppError::Transport(format!("{}: request write failed: {e}", self.label)))?;
        debug!(session = %self.label, method, "request sent");

        match tokio::time::timeout(timeout, channel.frames.recv()).await {
            Ok(Some(raw)) => Ok(Reply::from_raw(raw)),
            Ok(None) => match self.status.exit_description() {
                Some(exit) => Err(AppError::ProcessExited(format!(
                    "{}: {exit} while waiting for '{method}' reply",
                    self.label
                ))),
                None => Err(AppError::Transport(format!(
                    "{}: stdout closed while waiting for '{method}' reply",
                    self.label
                ))),
            },
            Err(_elapsed) => {
                warn!(session = %self.label, method, ?timeout, "request timed out");
                Err(AppError::Timeout(format!(
                    "{}: no reply to '{method}' within {timeout:?}",
                    self.label
                )))
            }
        }
    }

    /// Send a JSON-RPC request built from `method` and `params`.
    ///
    /// # Errors
    ///
    /// Same as [`FrameTransport::send_request`].
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Reply> {
        let request = JsonRpcRequest::new(self.next_request_id(), method, params);
        self.send_request(&to_value(&request)?, timeout).await
    }

    /// Send a JSON-RPC notification built from `method` and `params`.
    ///
    /// # Errors
    ///
    /// Same as [`FrameTransport::send_notification`].
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let notification = JsonRpcNotification::new(method, params);
        self.send_notification(&to_value(&notification)?).await
    }

    /// Stop the background tasks. Pending and future requests time out or
    /// report a closed stream.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for FrameTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ── Private helpers ───────────────────────────────────────────────────────────

/// Serialise `value` to compact JSON, append `\n`, write and flush.
async fn write_frame<W>(stdin: &mut W, value: &Value) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut bytes = serde_json::to_vec(value).map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("json serialisation failed: {e}"),
        )
    })?;
    bytes.push(b'\n');
    stdin.write_all(&bytes).await?;
    stdin.flush().await
}

fn to_value<T: Serialize>(envelope: &T) -> Result<Value> {
    serde_json::to_value(envelope)
        .map_err(|e| AppError::Transport(format!("failed to serialise envelope: {e}")))
}

fn method_of(payload: &Value) -> &str {
    payload
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
}
