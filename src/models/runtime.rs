//! Package-runner runtimes and their detected state.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Kind of package runner used to fetch and start a server package.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeKind {
    /// Node-ecosystem runner (`npx`).
    NodeRunner,
    /// Python-ecosystem runner (`uvx`).
    PythonRunner,
}

impl RuntimeKind {
    /// Every known runtime, in detection order.
    pub const ALL: [Self; 2] = [Self::NodeRunner, Self::PythonRunner];

    /// Executable name looked up on the search path.
    #[must_use]
    pub fn executable_name(self) -> &'static str {
        match self {
            Self::NodeRunner => "npx",
            Self::PythonRunner => "uvx",
        }
    }

    /// Flag that suppresses the runner's interactive install prompt.
    ///
    /// `uvx` never prompts, so it has none.
    #[must_use]
    pub fn confirm_flag(self) -> Option<&'static str> {
        match self {
            Self::NodeRunner => Some("-y"),
            Self::PythonRunner => None,
        }
    }

    /// Short name used on the command line and in logs.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::NodeRunner => "node",
            Self::PythonRunner => "python",
        }
    }

    /// Recognise a command token that names a runner.
    ///
    /// Accepts bare names (`npx`), Windows shims (`npx.cmd`, `uvx.exe`), and
    /// paths ending in either.
    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        let file_name = Path::new(token)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(token)
            .to_ascii_lowercase();
        let stem = file_name
            .strip_suffix(".cmd")
            .or_else(|| file_name.strip_suffix(".exe"))
            .unwrap_or(&file_name);

        Self::ALL
            .into_iter()
            .find(|kind| stem == kind.executable_name())
    }
}

impl std::str::FromStr for RuntimeKind {
    type Err = crate::AppError;

    fn from_str(raw: &str) -> crate::Result<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "node" | "npx" => Ok(Self::NodeRunner),
            "python" | "uvx" => Ok(Self::PythonRunner),
            other => Err(crate::AppError::Config(format!(
                "unknown runtime '{other}' (expected node or python)"
            ))),
        }
    }
}

/// Snapshot of one runtime's availability, taken at detection time.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RuntimeInfo {
    /// Which runner this describes.
    pub kind: RuntimeKind,
    /// Whether the executable was found on the search path.
    pub available: bool,
    /// Absolute path of the executable, when found.
    pub resolved_path: Option<PathBuf>,
    /// Output of `<runner> --version`, when the probe succeeded.
    pub version: Option<String>,
}

impl RuntimeInfo {
    /// A runtime that could not be found.
    #[must_use]
    pub fn unavailable(kind: RuntimeKind) -> Self {
        Self {
            kind,
            available: false,
            resolved_path: None,
            version: None,
        }
    }

    /// A runtime found at `path`.
    #[must_use]
    pub fn available(kind: RuntimeKind, path: PathBuf, version: Option<String>) -> Self {
        Self {
            kind,
            available: true,
            resolved_path: Some(path),
            version,
        }
    }

    /// Resolved executable path, only when the runtime is usable.
    #[must_use]
    pub fn executable(&self) -> Option<&Path> {
        if self.available {
            self.resolved_path.as_deref()
        } else {
            None
        }
    }
}
