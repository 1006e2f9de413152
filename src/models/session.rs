//! Session status and serialisable session snapshots.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Lifecycle status of a registered session.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Handshake completed; requests may be issued.
    Running,
    /// Cleanup has run; the process was asked to exit.
    Terminated,
}

/// Point-in-time view of a session for reporting.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SessionSummary {
    /// Opaque session identifier.
    pub id: String,
    /// Package or command the session was launched from.
    pub label: String,
    /// OS process id, if it was known at spawn time.
    pub pid: Option<u32>,
    /// Current status.
    pub status: SessionStatus,
    /// When the session was registered.
    pub started_at: DateTime<Utc>,
    /// Names of the discovered tools, in server order.
    pub tools: Vec<String>,
}
