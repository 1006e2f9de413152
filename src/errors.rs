//! Error types shared across the crate.
//!
//! Every failure that can cross the public API is an [`AppError`] variant,
//! so callers always receive a tagged outcome: a stable [`AppError::kind`],
//! a human-readable message, and, where the child process produced any, the
//! captured stderr as [`AppError::diagnostic`].

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// No usable package-runner executable was found.
    RuntimeUnavailable(String),
    /// The server process could not be started or exited before it was usable.
    Launch {
        /// Human-readable failure description.
        message: String,
        /// Captured stderr of the failed process, if any.
        stderr: Option<String>,
    },
    /// The `initialize` / `tools/list` sequence did not complete.
    Handshake {
        /// Human-readable failure description.
        message: String,
        /// Recent stderr lines of the server process, if any.
        stderr: Option<String>,
    },
    /// A request did not receive a reply within its timeout.
    Timeout(String),
    /// The server process had already exited when a request was attempted.
    ProcessExited(String),
    /// Failure writing to or reading from the server's stdio.
    Transport(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl AppError {
    /// Stable snake-case tag identifying the failure class.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::RuntimeUnavailable(_) => "runtime_unavailable",
            Self::Launch { .. } => "launch_failure",
            Self::Handshake { .. } => "handshake_failure",
            Self::Timeout(_) => "request_timeout",
            Self::ProcessExited(_) => "process_exited",
            Self::Transport(_) => "transport",
            Self::NotFound(_) => "unknown_session",
            Self::Io(_) => "io",
        }
    }

    /// Raw diagnostic text (child stderr) attached to the failure.
    #[must_use]
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            Self::Launch { stderr, .. } | Self::Handshake { stderr, .. } => stderr.as_deref(),
            _ => None,
        }
    }

    /// Whether the session that produced this error is still usable.
    ///
    /// Only request timeouts are soft; every other failure is terminal for
    /// the operation that raised it.
    #[must_use]
    pub fn is_soft(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::RuntimeUnavailable(msg) => write!(f, "runtime unavailable: {msg}"),
            Self::Launch { message, .. } => write!(f, "launch: {message}"),
            Self::Handshake { message, .. } => write!(f, "handshake: {message}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::ProcessExited(msg) => write!(f, "process exited: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
