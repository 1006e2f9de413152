//! Server process launch with a single-shot argument fallback.
//!
//! Some packages reject the extra arguments their catalog entry or runner
//! wrapper adds and exit straight away, complaining on stderr. When that
//! happens for a bare package name, [`Launcher::launch`] spawns once more
//! with the minimal `<runner> [confirm] <package>` argv. Explicit commands
//! are taken as exact and never retried.

use std::fmt::{Display, Formatter};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Child;
use tracing::{info, warn};

use crate::config::DeployerConfig;
use crate::models::launch::LaunchSpec;
use crate::models::runtime::{RuntimeInfo, RuntimeKind};
use crate::platform::PlatformOps;
use crate::stdio::reader::truncate_chars;
use crate::AppError;

/// Placeholders replaced by the configured transport token.
pub const TRANSPORT_PLACEHOLDERS: &[&str] = &["${transport}", "{transport}", "<transport>"];

/// Stderr fragments that mean the server rejected its arguments.
pub const INCOMPATIBILITY_PHRASES: &[&str] = &[
    "unknown option '--stdio'",
    "unknown option",
    "too many arguments",
    "Expected 0 arguments but got",
    "unexpected argument",
];

/// Upper bound on waiting for an exited process's stderr to reach EOF.
const STDERR_READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Captured stderr is truncated to this many chars.
const STDERR_CAPTURE_CHARS: usize = 2000;

/// A process that survived the startup grace period.
#[derive(Debug)]
pub struct LaunchedProcess {
    /// The running child, stdio pipes still attached.
    pub child: Child,
    /// The argv it was started with.
    pub argv: Vec<String>,
    /// Number of spawns it took: 1, or 2 after a fallback.
    pub attempts: u32,
}

/// Why a launch did not produce a running process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchFailure {
    /// The selected runtime has no resolved executable.
    RuntimeUnavailable(RuntimeKind),
    /// The launch spec cannot produce an argv.
    InvalidSpec(String),
    /// The OS refused to create the process.
    SpawnFailed {
        /// Argv of the failed attempt.
        argv: Vec<String>,
        /// OS error text.
        reason: String,
    },
    /// The process exited during the startup grace period.
    ExitedEarly {
        /// Argv of the failed attempt.
        argv: Vec<String>,
        /// Exit code, when the platform reports one.
        exit_code: Option<i32>,
        /// Captured stderr, truncated.
        stderr: String,
    },
}

impl LaunchFailure {
    /// Captured stderr, when the process got far enough to write any.
    #[must_use]
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Self::ExitedEarly { stderr, .. } if !stderr.is_empty() => Some(stderr),
            _ => None,
        }
    }

    /// Whether the captured stderr matches an argument-incompatibility phrase.
    #[must_use]
    pub fn is_incompatibility(&self) -> bool {
        self.stderr().is_some_and(is_incompatibility)
    }
}

impl Display for LaunchFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RuntimeUnavailable(kind) => write!(
                f,
                "runtime '{}' ({}) is not available",
                kind.label(),
                kind.executable_name()
            ),
            Self::InvalidSpec(msg) => write!(f, "invalid launch spec: {msg}"),
            Self::SpawnFailed { argv, reason } => {
                write!(f, "failed to spawn `{}`: {reason}", argv.join(" "))
            }
            Self::ExitedEarly {
                argv, exit_code, ..
            } => match exit_code {
                Some(code) => write!(f, "`{}` exited during startup with code {code}", argv.join(" ")),
                None => write!(f, "`{}` exited during startup", argv.join(" ")),
            },
        }
    }
}

impl From<LaunchFailure> for AppError {
    fn from(failure: LaunchFailure) -> Self {
        match failure {
            LaunchFailure::RuntimeUnavailable(_) => Self::RuntimeUnavailable(failure.to_string()),
            LaunchFailure::InvalidSpec(msg) => Self::Config(msg),
            LaunchFailure::SpawnFailed { .. } | LaunchFailure::ExitedEarly { .. } => Self::Launch {
                message: failure.to_string(),
                stderr: failure.stderr().map(str::to_owned),
            },
        }
    }
}

/// Builds argvs and spawns server processes through a [`PlatformOps`].
pub struct Launcher<P: ?Sized> {
    platform: Arc<P>,
    transport_token: String,
    startup_grace: Duration,
}

impl<P> Launcher<P>
where
    P: PlatformOps + ?Sized,
{
    /// Create a launcher using `config`'s transport token and grace period.
    #[must_use]
    pub fn new(platform: Arc<P>, config: &DeployerConfig) -> Self {
        Self {
            platform,
            transport_token: config.launch.transport_token.clone(),
            startup_grace: config.startup_grace(),
        }
    }

    /// Spawn the server described by `spec` with `runtime`.
    ///
    /// At most two spawns happen per call. The second one is made only when
    /// `spec` has no explicit command and the first process exited with an
    /// argument-incompatibility complaint on stderr.
    ///
    /// # Errors
    ///
    /// Returns the [`LaunchFailure`] of the last attempt.
    pub async fn launch(
        &self,
        spec: &LaunchSpec,
        runtime: &RuntimeInfo,
    ) -> Result<LaunchedProcess, LaunchFailure> {
        spec.validate()
            .map_err(|err| LaunchFailure::InvalidSpec(err.to_string()))?;
        let executable = runtime
            .executable()
            .ok_or(LaunchFailure::RuntimeUnavailable(runtime.kind))?;

        let argv = build_argv(spec, runtime.kind, executable, &self.transport_token)?;
        info!(argv = %argv.join(" "), runtime = runtime.kind.label(), "launching server");

        let failure = match self.spawn_and_settle(&argv).await {
            Ok(child) => {
                return Ok(LaunchedProcess {
                    child,
                    argv,
                    attempts: 1,
                })
            }
            Err(failure) => failure,
        };

        let package = match spec.usable_package() {
            Some(package) if spec.usable_command().is_none() && failure.is_incompatibility() => {
                package
            }
            _ => return Err(failure),
        };

        let minimal = minimal_argv(runtime.kind, executable, package);
        warn!(
            first = %failure,
            fallback = %minimal.join(" "),
            "server rejected its arguments, retrying with minimal argv"
        );
        let child = self.spawn_and_settle(&minimal).await?;
        Ok(LaunchedProcess {
            child,
            argv: minimal,
            attempts: 2,
        })
    }

    /// Spawn `argv`, wait out the grace period, and check it is still alive.
    async fn spawn_and_settle(&self, argv: &[String]) -> Result<Child, LaunchFailure> {
        let mut child = self
            .platform
            .spawn(argv)
            .map_err(|err| LaunchFailure::SpawnFailed {
                argv: argv.to_vec(),
                reason: err.to_string(),
            })?;

        tokio::time::sleep(self.startup_grace).await;

        match child.try_wait() {
            Ok(None) => {
                info!(pid = ?child.id(), "server process survived startup grace period");
                Ok(child)
            }
            Ok(Some(status)) => {
                let stderr = read_exited_stderr(&mut child).await;
                warn!(
                    argv = %argv.join(" "),
                    %status,
                    stderr = %truncate_chars(&stderr, 300),
                    "server process exited during startup"
                );
                Err(LaunchFailure::ExitedEarly {
                    argv: argv.to_vec(),
                    exit_code: status.code(),
                    stderr,
                })
            }
            Err(err) => Err(LaunchFailure::SpawnFailed {
                argv: argv.to_vec(),
                reason: format!("failed to poll process status: {err}"),
            }),
        }
    }
}

/// Build the first-attempt argv for `spec`.
///
/// An explicit command has its transport placeholder substituted and is
/// split on whitespace. A leading runner token (`npx`, `uvx.exe`, ...) is
/// replaced by `executable`; otherwise `executable` and the runtime's
/// confirm flag are prepended. A bare package becomes the minimal argv.
///
/// # Errors
///
/// Returns [`LaunchFailure::InvalidSpec`] when neither source yields tokens.
pub fn build_argv(
    spec: &LaunchSpec,
    kind: RuntimeKind,
    executable: &Path,
    transport_token: &str,
) -> Result<Vec<String>, LaunchFailure> {
    if let Some(command) = spec.usable_command() {
        let command = substitute_placeholders(command, transport_token);
        let mut tokens = command.split_whitespace().map(str::to_owned);
        let Some(first) = tokens.next() else {
            return Err(LaunchFailure::InvalidSpec(
                "explicit command is empty after placeholder substitution".into(),
            ));
        };

        let mut argv = vec![executable.display().to_string()];
        if RuntimeKind::from_token(&first).is_none() {
            argv.extend(kind.confirm_flag().map(str::to_owned));
            argv.push(first);
        }
        argv.extend(tokens);
        return Ok(argv);
    }

    spec.usable_package()
        .map(|package| minimal_argv(kind, executable, package))
        .ok_or_else(|| {
            LaunchFailure::InvalidSpec("launch spec needs a package name or an explicit command".into())
        })
}

/// `<executable> [confirm flag] <package>`.
#[must_use]
pub fn minimal_argv(kind: RuntimeKind, executable: &Path, package: &str) -> Vec<String> {
    let mut argv = vec![executable.display().to_string()];
    argv.extend(kind.confirm_flag().map(str::to_owned));
    argv.push(package.to_owned());
    argv
}

/// Replace every transport placeholder in `command` with `token`.
#[must_use]
pub fn substitute_placeholders(command: &str, token: &str) -> String {
    TRANSPORT_PLACEHOLDERS
        .iter()
        .fold(command.to_owned(), |acc, placeholder| acc.replace(placeholder, token))
}

/// Whether `stderr` contains an argument-incompatibility phrase.
#[must_use]
pub fn is_incompatibility(stderr: &str) -> bool {
    INCOMPATIBILITY_PHRASES
        .iter()
        .any(|phrase| stderr.contains(phrase))
}

/// Read what an exited process left on stderr, bounded in time and size.
async fn read_exited_stderr(child: &mut Child) -> String {
    let Some(mut stderr) = child.stderr.take() else {
        return String::new();
    };

    let mut raw = Vec::new();
    match tokio::time::timeout(STDERR_READ_TIMEOUT, stderr.read_to_end(&mut raw)).await {
        Ok(Ok(_)) => {}
        Ok(Err(err)) => warn!(error = %err, "failed to read stderr of exited process"),
        // A grandchild holding the pipe open keeps it from reaching EOF.
        Err(_elapsed) => warn!("timed out reading stderr of exited process"),
    }

    let text = String::from_utf8_lossy(&raw);
    truncate_chars(text.trim(), STDERR_CAPTURE_CHARS)
}
