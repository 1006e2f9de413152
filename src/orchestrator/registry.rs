//! Live session registry.
//!
//! A [`Session`] binds one handshaken process to its transport and tool
//! list. The [`SessionRegistry`] is an explicitly constructed value. Its map
//! lock is never held across process I/O, so registry operations do not
//! wait on an in-flight request.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::session::{SessionStatus, SessionSummary};
use crate::models::tool::ToolDescriptor;
use crate::orchestrator::process::ProcessHandle;
use crate::stdio::transport::FrameTransport;

/// Prefix of every generated session id.
pub const SESSION_ID_PREFIX: &str = "mcp_";

/// A running server process with its transport and discovered tools.
#[derive(Debug)]
pub struct Session {
    id: String,
    label: String,
    process: Arc<ProcessHandle>,
    transport: FrameTransport,
    tools: Vec<ToolDescriptor>,
    terminated: AtomicBool,
    started_at: DateTime<Utc>,
}

impl Session {
    /// Opaque session identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Package or command the session was launched from.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The server process.
    #[must_use]
    pub fn process(&self) -> &ProcessHandle {
        &self.process
    }

    /// The transport bound to the server process.
    #[must_use]
    pub fn transport(&self) -> &FrameTransport {
        &self.transport
    }

    /// Tools discovered during the handshake, in server order.
    #[must_use]
    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    /// Registration time.
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Current lifecycle status.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        if self.terminated.load(Ordering::Acquire) {
            SessionStatus::Terminated
        } else {
            SessionStatus::Running
        }
    }

    /// Serialisable snapshot.
    #[must_use]
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            label: self.label.clone(),
            pid: self.process.pid(),
            status: self.status(),
            started_at: self.started_at,
            tools: self.tools.iter().map(|tool| tool.name.clone()).collect(),
        }
    }

    /// Request process exit, stop the transport tasks, mark terminated.
    async fn shut_down(&self, grace: Duration) {
        let exited = self.process.terminate(grace).await;
        self.transport.shutdown();
        self.terminated.store(true, Ordering::Release);
        info!(session_id = %self.id, exited, "session terminated");
    }
}

/// Map of live sessions keyed by id.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a handshaken session under a fresh id and return the id.
    ///
    /// Ids are `mcp_` followed by 32 hex digits. An existing entry is never
    /// overwritten.
    pub async fn register(
        &self,
        label: impl Into<String>,
        process: Arc<ProcessHandle>,
        transport: FrameTransport,
        tools: Vec<ToolDescriptor>,
    ) -> String {
        let mut sessions = self.sessions.write().await;
        let id = loop {
            let candidate = format!("{SESSION_ID_PREFIX}{}", Uuid::new_v4().simple());
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
        };

        let session = Session {
            id: id.clone(),
            label: label.into(),
            process,
            transport,
            tools,
            terminated: AtomicBool::new(false),
            started_at: Utc::now(),
        };
        info!(
            session_id = %id,
            label = %session.label,
            pid = ?session.process.pid(),
            tools = session.tools.len(),
            "session registered"
        );
        sessions.insert(id.clone(), Arc::new(session));
        id
    }

    /// Look up a live session.
    pub async fn lookup(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Remove a session and terminate its process.
    ///
    /// Returns `false` without side effects for an unknown id. Otherwise the
    /// entry is removed first, so concurrent lookups stop seeing it, and the
    /// process is asked to exit with up to `grace` to comply. Returns `true`
    /// whether or not it exited in time.
    pub async fn terminate(&self, id: &str, grace: Duration) -> bool {
        let Some(session) = self.sessions.write().await.remove(id) else {
            return false;
        };
        session.shut_down(grace).await;
        true
    }

    /// Terminate every registered session concurrently. Returns how many
    /// were terminated.
    pub async fn terminate_all(&self, grace: Duration) -> usize {
        let drained: Vec<Arc<Session>> = self.sessions.write().await.drain().map(|(_, s)| s).collect();
        let count = drained.len();

        let mut tasks = JoinSet::new();
        for session in drained {
            tasks.spawn(async move { session.shut_down(grace).await });
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                warn!(error = %err, "session shutdown task failed");
            }
        }

        if count > 0 {
            info!(count, "all sessions terminated");
        }
        count
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether no session is live.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Snapshots of every live session, oldest first.
    pub async fn summaries(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> = self
            .sessions
            .read()
            .await
            .values()
            .map(|session| session.summary())
            .collect();
        summaries.sort_by_key(|summary| summary.started_at);
        summaries
    }
}
