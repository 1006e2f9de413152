//! Ownership of a spawned server process.
//!
//! [`ProcessHandle`] wraps the `tokio::process::Child` after its stdio pipes
//! have been handed to the transport. It answers non-blocking liveness
//! queries and performs graceful termination. Termination is a request only:
//! a process that ignores it is left running, and dropping the handle never
//! kills anything.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::process::Child;
use tracing::{debug, info, warn};

use crate::stdio::transport::ProcessStatus;

/// Interval between liveness polls while waiting for exit.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A spawned server process, shared between its session and its transport.
#[derive(Debug)]
pub struct ProcessHandle {
    label: String,
    pid: Option<u32>,
    child: Mutex<Child>,
}

impl ProcessHandle {
    /// Take ownership of `child`. Its stdio pipes should already be taken.
    #[must_use]
    pub fn new(label: impl Into<String>, child: Child) -> Self {
        Self {
            label: label.into(),
            pid: child.id(),
            child: Mutex::new(child),
        }
    }

    /// OS process id recorded at spawn time.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Non-blocking check that the process has not exited.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.exit_description().is_none()
    }

    /// Ask the process to exit and wait up to `grace` for it to do so.
    ///
    /// Returns `true` when the process exited within `grace`. A process that
    /// had already exited counts as exited.
    pub async fn terminate(&self, grace: Duration) -> bool {
        if !self.is_running() {
            debug!(session = %self.label, "terminate: process already exited");
            return true;
        }

        self.request_exit();

        let deadline = tokio::time::Instant::now() + grace;
        loop {
            if !self.is_running() {
                info!(session = %self.label, pid = ?self.pid, "process exited after termination request");
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    session = %self.label,
                    pid = ?self.pid,
                    ?grace,
                    "process still running after termination grace period, leaving it"
                );
                return false;
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }
    }

    /// Deliver SIGTERM.
    #[cfg(unix)]
    fn request_exit(&self) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.pid.and_then(|pid| i32::try_from(pid).ok()) else {
            warn!(session = %self.label, "terminate: no usable pid, cannot signal process");
            return;
        };
        debug!(session = %self.label, pid, "sending SIGTERM");
        if let Err(err) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
            warn!(session = %self.label, pid, error = %err, "SIGTERM failed");
        }
    }

    /// `TerminateProcess` is the only termination request Windows offers.
    #[cfg(not(unix))]
    fn request_exit(&self) {
        let mut child = self.child.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(err) = child.start_kill() {
            warn!(session = %self.label, error = %err, "failed to request process exit");
        }
    }
}

impl ProcessStatus for ProcessHandle {
    fn exit_description(&self) -> Option<String> {
        let mut child = self.child.lock().unwrap_or_else(PoisonError::into_inner);
        match child.try_wait() {
            Ok(Some(status)) => Some(format!("process exited ({status})")),
            Ok(None) => None,
            Err(err) => {
                debug!(session = %self.label, error = %err, "failed to poll process status");
                None
            }
        }
    }
}
