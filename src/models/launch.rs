//! Launch requests supplied by catalog collaborators.

use std::time::Duration;

use crate::models::runtime::RuntimeKind;
use crate::{AppError, Result};

/// What to launch and how long each protocol request may take.
///
/// `explicit_command` wins over `package_name` when both are present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Published package to run through the runtime (e.g. `@scope/server`).
    pub package_name: Option<String>,
    /// Full command line such as `npx -y pkg {transport}`.
    pub explicit_command: Option<String>,
    /// Reply timeout for handshake requests.
    pub timeout: Duration,
}

impl LaunchSpec {
    /// Launch a bare package name.
    #[must_use]
    pub fn package(name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            package_name: Some(name.into()),
            explicit_command: None,
            timeout,
        }
    }

    /// Launch an explicit command line.
    #[must_use]
    pub fn command(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            package_name: None,
            explicit_command: Some(command.into()),
            timeout,
        }
    }

    /// The explicit command, if present and non-blank.
    #[must_use]
    pub fn usable_command(&self) -> Option<&str> {
        self.explicit_command
            .as_deref()
            .map(str::trim)
            .filter(|cmd| !cmd.is_empty())
    }

    /// The package name, if present and non-blank.
    #[must_use]
    pub fn usable_package(&self) -> Option<&str> {
        self.package_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }

    /// Check that at least one of the two launch sources is usable.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` when neither a package name nor an explicit
    /// command is present, or when the timeout is zero.
    pub fn validate(&self) -> Result<()> {
        if self.usable_command().is_none() && self.usable_package().is_none() {
            return Err(AppError::Config(
                "launch spec needs a package name or an explicit command".into(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(AppError::Config("launch timeout must be non-zero".into()));
        }
        Ok(())
    }

    /// Name shown in logs: the last command token, else the package name.
    #[must_use]
    pub fn display_name(&self) -> String {
        self.usable_command()
            .and_then(|cmd| cmd.split_whitespace().last())
            .or_else(|| self.usable_package())
            .unwrap_or("<unnamed>")
            .to_owned()
    }

    /// Runtime named by the explicit command's first token, if any.
    #[must_use]
    pub fn named_runtime(&self) -> Option<RuntimeKind> {
        self.usable_command()
            .and_then(|cmd| cmd.split_whitespace().next())
            .and_then(RuntimeKind::from_token)
    }

    /// Runtime implied by the command's first token; Node otherwise.
    #[must_use]
    pub fn infer_runtime(&self) -> RuntimeKind {
        self.named_runtime().unwrap_or(RuntimeKind::NodeRunner)
    }
}
