//! Operating-system capabilities behind one seam.
//!
//! Executable lookup, process creation and version probing are the only
//! places where behaviour differs per platform. They sit behind
//! [`PlatformOps`] so the resolver and launcher can run against a fake in
//! tests, and so every Windows-specific flag lives in this file.

use std::env;
use std::ffi::OsStr;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::debug;

/// `CREATE_NO_WINDOW` process creation flag.
#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Extensions tried on Windows when `PATHEXT` is unset.
#[cfg(windows)]
const DEFAULT_PATH_EXTENSIONS: &[&str] = &[".com", ".exe", ".bat", ".cmd"];

/// Process-level operations the deployer needs from the host.
pub trait PlatformOps: Send + Sync {
    /// Locate `program` on the search path.
    fn which(&self, program: &str) -> Option<PathBuf>;

    /// Spawn `argv[0]` with the remaining arguments and all three standard
    /// streams piped. No shell is involved.
    ///
    /// # Errors
    ///
    /// Returns the OS error when the process cannot be created.
    fn spawn(&self, argv: &[String]) -> io::Result<Child>;

    /// Run `<executable> --version` and return the first non-empty stdout
    /// line. `Ok(None)` means the probe ran but reported no usable version.
    ///
    /// # Errors
    ///
    /// Returns an error when the probe cannot be spawned or exceeds
    /// `timeout`.
    fn probe_version<'a>(
        &'a self,
        executable: &'a Path,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = io::Result<Option<String>>> + Send + 'a>>;
}

/// [`PlatformOps`] backed by the real operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPlatform;

impl PlatformOps for SystemPlatform {
    fn which(&self, program: &str) -> Option<PathBuf> {
        let path = env::var_os("PATH")?;
        find_on_path(program, &path)
    }

    fn spawn(&self, argv: &[String]) -> io::Result<Child> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty argv"))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        suppress_console(&mut cmd);
        cmd.spawn()
    }

    fn probe_version<'a>(
        &'a self,
        executable: &'a Path,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = io::Result<Option<String>>> + Send + 'a>> {
        Box::pin(async move {
            let mut cmd = Command::new(executable);
            cmd.arg("--version")
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .kill_on_drop(true);
            suppress_console(&mut cmd);

            let output = tokio::time::timeout(timeout, cmd.output())
                .await
                .map_err(|_elapsed| {
                    io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("version probe exceeded {timeout:?}"),
                    )
                })??;
            if !output.status.success() {
                debug!(executable = %executable.display(), status = %output.status, "version probe exited non-zero");
                return Ok(None);
            }

            Ok(String::from_utf8_lossy(&output.stdout)
                .lines()
                .map(str::trim)
                .find(|line| !line.is_empty())
                .map(str::to_owned))
        })
    }
}

/// Hide the console window a child would otherwise open on Windows.
#[cfg(windows)]
pub fn suppress_console(cmd: &mut Command) {
    cmd.creation_flags(CREATE_NO_WINDOW);
}

/// Hide the console window a child would otherwise open on Windows.
#[cfg(not(windows))]
pub fn suppress_console(_cmd: &mut Command) {}

/// Search the directories in `path` (a `PATH`-style list) for `program`.
///
/// A `program` containing a path separator is checked as-is. On Windows
/// each `PATHEXT` extension is tried; on Unix only files with an execute bit
/// match.
#[must_use]
pub fn find_on_path(program: &str, path: &OsStr) -> Option<PathBuf> {
    if program.is_empty() {
        return None;
    }

    let direct = Path::new(program);
    if direct.components().count() > 1 {
        return is_executable(direct).then(|| direct.to_path_buf());
    }

    env::split_paths(path)
        .filter(|dir| !dir.as_os_str().is_empty())
        .flat_map(|dir| candidate_names(program).into_iter().map(move |name| dir.join(name)))
        .find(|candidate| is_executable(candidate))
}

#[cfg(windows)]
fn candidate_names(program: &str) -> Vec<String> {
    // An extension-less `npx` next to `npx.cmd` is a shell script that
    // cannot be spawned directly, so bare names are never tried here.
    let lower = program.to_ascii_lowercase();
    let extensions = path_extensions();
    if extensions.iter().any(|ext| lower.ends_with(ext.as_str())) {
        return vec![program.to_owned()];
    }
    extensions
        .into_iter()
        .map(|ext| format!("{program}{ext}"))
        .collect()
}

#[cfg(not(windows))]
fn candidate_names(program: &str) -> Vec<String> {
    vec![program.to_owned()]
}

#[cfg(windows)]
fn path_extensions() -> Vec<String> {
    let parsed: Vec<String> = env::var("PATHEXT")
        .unwrap_or_default()
        .split(';')
        .map(|ext| ext.trim().to_ascii_lowercase())
        .filter(|ext| ext.starts_with('.'))
        .collect();
    if parsed.is_empty() {
        DEFAULT_PATH_EXTENSIONS.iter().map(|ext| (*ext).to_owned()).collect()
    } else {
        parsed
    }
}

#[cfg(unix)]
fn is_executable(candidate: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    std::fs::metadata(candidate)
        .is_ok_and(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(candidate: &Path) -> bool {
    candidate.is_file()
}
