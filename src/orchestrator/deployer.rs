//! Deployment facade: runtime selection, launch, handshake, registration,
//! tool invocation and cleanup.
//!
//! `deploy` either registers a fully handshaken session or returns a single
//! terminal error; a half-started process is terminated before returning.
//! `call_tool` never fails for a known session: timeouts, exits, JSON-RPC
//! errors and non-JSON replies all come back as a [`ToolCallResult`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::DeployerConfig;
use crate::models::launch::LaunchSpec;
use crate::models::runtime::{RuntimeInfo, RuntimeKind};
use crate::models::tool::{ToolCallResult, ToolDescriptor};
use crate::orchestrator::launcher::Launcher;
use crate::orchestrator::process::ProcessHandle;
use crate::orchestrator::registry::{Session, SessionRegistry};
use crate::orchestrator::resolver;
use crate::platform::PlatformOps;
use crate::stdio::handshake::{handshake, parse_tools_reply};
use crate::stdio::message::methods;
use crate::stdio::transport::{FrameTransport, ProcessStatus, Reply, TransportOptions};
use crate::{AppError, Result};

/// Outcome of a successful [`Deployer::deploy`].
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DeployedSession {
    /// Registry id of the new session.
    pub session_id: String,
    /// Package or command the session was launched from.
    pub label: String,
    /// Argv the surviving process was started with.
    pub argv: Vec<String>,
    /// Spawns it took: 1, or 2 after the argument fallback.
    pub attempts: u32,
    /// Tools advertised by the server.
    pub tools: Vec<ToolDescriptor>,
}

/// Deploys tool servers and routes calls to them.
pub struct Deployer<P: ?Sized> {
    config: Arc<DeployerConfig>,
    platform: Arc<P>,
    registry: Arc<SessionRegistry>,
    launcher: Launcher<P>,
    runtimes: RwLock<Option<Vec<RuntimeInfo>>>,
}

impl<P> Deployer<P>
where
    P: PlatformOps + ?Sized,
{
    /// Build a deployer over an explicitly constructed registry.
    #[must_use]
    pub fn new(
        config: Arc<DeployerConfig>,
        platform: Arc<P>,
        registry: Arc<SessionRegistry>,
    ) -> Self {
        let launcher = Launcher::new(Arc::clone(&platform), &config);
        Self {
            config,
            platform,
            registry,
            launcher,
            runtimes: RwLock::new(None),
        }
    }

    /// The registry sessions are stored in.
    #[must_use]
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Runtime snapshot, probed on first use and cached afterwards.
    pub async fn detect_runtimes(&self) -> Vec<RuntimeInfo> {
        if let Some(cached) = self.runtimes.read().await.as_ref() {
            return cached.clone();
        }
        self.refresh_runtimes().await
    }

    /// Probe the runtimes again and replace the cached snapshot.
    pub async fn refresh_runtimes(&self) -> Vec<RuntimeInfo> {
        let detected =
            resolver::detect(self.platform.as_ref(), self.config.version_probe_timeout()).await;
        *self.runtimes.write().await = Some(detected.clone());
        detected
    }

    /// Launch, handshake and register a server.
    ///
    /// The runner named by an explicit command wins over `hint`; without
    /// either the Node runner is used.
    ///
    /// # Errors
    ///
    /// - `AppError::Config` — `spec` is unusable.
    /// - `AppError::RuntimeUnavailable` — the selected runner is not installed.
    /// - `AppError::Launch` — spawning failed or the process exited during
    ///   startup, after the fallback where one applies.
    /// - `AppError::Handshake` — the protocol handshake did not complete; the
    ///   process has been asked to exit.
    pub async fn deploy(
        &self,
        spec: &LaunchSpec,
        hint: Option<RuntimeKind>,
    ) -> Result<DeployedSession> {
        spec.validate()?;
        let kind = select_runtime(spec, hint);

        let runtimes = self.detect_runtimes().await;
        let runtime = resolver::find(&runtimes, kind)
            .filter(|info| info.available)
            .ok_or_else(|| {
                AppError::RuntimeUnavailable(format!(
                    "runtime '{}' ({}) is not available on this host",
                    kind.label(),
                    kind.executable_name()
                ))
            })?;

        let label = spec.display_name();
        info!(%label, runtime = kind.label(), "deploying server");

        let launched = self.launcher.launch(spec, runtime).await?;
        let mut child = launched.child;
        let pipes = (child.stdin.take(), child.stdout.take(), child.stderr.take());
        let process = Arc::new(ProcessHandle::new(label.clone(), child));

        let (Some(stdin), Some(stdout), Some(stderr)) = pipes else {
            process.terminate(self.config.terminate_grace()).await;
            return Err(AppError::Launch {
                message: format!("{label}: child stdio was not piped"),
                stderr: None,
            });
        };

        let status: Arc<dyn ProcessStatus> = process.clone();
        let transport = FrameTransport::start(
            label.clone(),
            stdin,
            stdout,
            stderr,
            status,
            &TransportOptions::from(&self.config.launch),
        );

        let tools = match handshake(&transport, &self.config.protocol, spec.timeout).await {
            Ok(tools) => tools,
            Err(err) => {
                warn!(%label, error = %err, "handshake failed, terminating server");
                process.terminate(self.config.terminate_grace()).await;
                transport.shutdown();
                return Err(err);
            }
        };

        let session_id = self
            .registry
            .register(label.clone(), process, transport, tools.clone())
            .await;

        Ok(DeployedSession {
            session_id,
            label,
            argv: launched.argv,
            attempts: launched.attempts,
            tools,
        })
    }

    /// Invoke `name` with `arguments` on a session.
    ///
    /// `arguments` is forwarded verbatim. Every outcome other than an unknown
    /// session is reported inside the returned [`ToolCallResult`], and the
    /// session stays registered whatever happens.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if `session_id` is not registered.
    pub async fn call_tool(
        &self,
        session_id: &str,
        name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<ToolCallResult> {
        let session = self.session(session_id).await?;
        let started = Instant::now();
        let params = json!({ "name": name, "arguments": arguments });

        let outcome = session
            .transport()
            .request(methods::TOOLS_CALL, Some(params), timeout)
            .await;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let result = match outcome {
            Ok(reply) => call_result_from_reply(name, &reply, duration_ms),
            Err(err) => {
                warn!(session_id, tool = name, error = %err, "tool call failed");
                ToolCallResult {
                    tool_name: name.to_owned(),
                    success: false,
                    result: None,
                    error: Some(err.to_string()),
                    error_kind: Some(err.kind().to_owned()),
                    raw: None,
                    duration_ms,
                }
            }
        };
        info!(session_id, tool = name, success = result.success, duration_ms, "tool call finished");
        Ok(result)
    }

    /// Ask a live session for its tool list again.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` — unknown session id.
    /// - `AppError::Timeout` / `AppError::ProcessExited` / `AppError::Transport`
    ///   — the request failed or the reply was not a tool list.
    pub async fn list_tools(
        &self,
        session_id: &str,
        timeout: Duration,
    ) -> Result<Vec<ToolDescriptor>> {
        let session = self.session(session_id).await?;
        let reply = session
            .transport()
            .request(methods::TOOLS_LIST, None, timeout)
            .await?;
        parse_tools_reply(&reply)
    }

    /// Terminate one session. `false` when the id is unknown.
    pub async fn cleanup(&self, session_id: &str) -> bool {
        self.registry
            .terminate(session_id, self.config.terminate_grace())
            .await
    }

    /// Terminate every session; returns how many there were.
    pub async fn cleanup_all(&self) -> usize {
        self.registry
            .terminate_all(self.config.terminate_grace())
            .await
    }

    async fn session(&self, session_id: &str) -> Result<Arc<Session>> {
        self.registry
            .lookup(session_id)
            .await
            .ok_or_else(|| AppError::NotFound(format!("unknown session '{session_id}'")))
    }
}

/// Runner named by the command, else the caller's hint, else Node.
fn select_runtime(spec: &LaunchSpec, hint: Option<RuntimeKind>) -> RuntimeKind {
    match (spec.named_runtime(), hint) {
        (Some(named), Some(hinted)) if named != hinted => {
            warn!(
                named = named.label(),
                hinted = hinted.label(),
                "command names a different runtime than requested, using the command's"
            );
            named
        }
        (Some(named), _) => named,
        (None, hinted) => hinted.unwrap_or_else(|| spec.infer_runtime()),
    }
}

fn call_result_from_reply(name: &str, reply: &Reply, duration_ms: u64) -> ToolCallResult {
    let raw = Some(reply.raw().to_owned());

    if let Some(message) = reply.error_message() {
        return ToolCallResult {
            tool_name: name.to_owned(),
            success: false,
            result: None,
            error: Some(message),
            error_kind: Some("rpc_error".into()),
            raw,
            duration_ms,
        };
    }

    let result = match reply {
        Reply::Json { value, .. } => value.get("result").cloned().unwrap_or_else(|| value.clone()),
        Reply::Text(text) => Value::String(text.clone()),
    };
    ToolCallResult {
        tool_name: name.to_owned(),
        success: true,
        result: Some(result),
        error: None,
        error_kind: None,
        raw,
        duration_ms,
    }
}
