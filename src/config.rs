//! Deployer configuration parsing and validation.
//!
//! Every key has a default, so an empty TOML document (or no file at all)
//! yields a usable configuration.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Timeout values for process startup, requests, and shutdown.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct TimeoutConfig {
    /// Default per-request reply timeout, also used for the handshake.
    pub request_seconds: u64,
    /// Delay after spawning before checking whether the process died.
    pub startup_grace_ms: u64,
    /// How long `terminate` waits for a process to exit.
    pub terminate_grace_seconds: u64,
    /// Timeout for `<runner> --version` probes.
    pub version_probe_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_seconds: 30,
            startup_grace_ms: 2000,
            terminate_grace_seconds: 5,
            version_probe_seconds: 5,
        }
    }
}

/// Protocol identity advertised in the `initialize` request.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct ProtocolConfig {
    /// Protocol revision string sent as `protocolVersion`.
    pub version: String,
    /// `clientInfo.name`.
    pub client_name: String,
    /// `clientInfo.version`.
    pub client_version: String,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            version: "2024-11-05".into(),
            client_name: "mcp-deployer".into(),
            client_version: env!("CARGO_PKG_VERSION").into(),
        }
    }
}

/// Process launch and stream handling limits.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct LaunchConfig {
    /// Value substituted for the transport placeholder in launch commands.
    pub transport_token: String,
    /// Largest unterminated frame kept in the decoder buffer.
    pub max_frame_bytes: usize,
    /// Stderr lines longer than this (in chars) are truncated before logging.
    pub stderr_line_chars: usize,
    /// Number of recent stderr lines retained for failure diagnostics.
    pub stderr_tail_lines: usize,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            transport_token: "stdio".into(),
            max_frame_bytes: 8 * 1024 * 1024,
            stderr_line_chars: 300,
            stderr_tail_lines: 50,
        }
    }
}

/// Top-level configuration parsed from `deployer.toml`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct DeployerConfig {
    /// Timeouts.
    pub timeouts: TimeoutConfig,
    /// Handshake identity.
    pub protocol: ProtocolConfig,
    /// Launch and stream limits.
    pub launch: LaunchConfig,
}

impl DeployerConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Default reply timeout for requests.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.request_seconds)
    }

    /// Grace period between spawning a process and checking it is alive.
    #[must_use]
    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.timeouts.startup_grace_ms)
    }

    /// Maximum wait for a terminated process to exit.
    #[must_use]
    pub fn terminate_grace(&self) -> Duration {
        Duration::from_secs(self.timeouts.terminate_grace_seconds)
    }

    /// Timeout for runtime version probes.
    #[must_use]
    pub fn version_probe_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.version_probe_seconds)
    }

    fn validate(&self) -> Result<()> {
        let timeouts = [
            ("timeouts.request_seconds", self.timeouts.request_seconds),
            ("timeouts.startup_grace_ms", self.timeouts.startup_grace_ms),
            (
                "timeouts.terminate_grace_seconds",
                self.timeouts.terminate_grace_seconds,
            ),
            (
                "timeouts.version_probe_seconds",
                self.timeouts.version_probe_seconds,
            ),
        ];
        if let Some((key, _)) = timeouts.iter().find(|(_, value)| *value == 0) {
            return Err(AppError::Config(format!("{key} must be greater than zero")));
        }

        let limits = [
            ("launch.max_frame_bytes", self.launch.max_frame_bytes),
            ("launch.stderr_line_chars", self.launch.stderr_line_chars),
            ("launch.stderr_tail_lines", self.launch.stderr_tail_lines),
        ];
        if let Some((key, _)) = limits.iter().find(|(_, value)| *value == 0) {
            return Err(AppError::Config(format!("{key} must be greater than zero")));
        }

        if self.protocol.version.trim().is_empty() {
            return Err(AppError::Config(
                "protocol.version must not be empty".into(),
            ));
        }

        if self.launch.transport_token.split_whitespace().count() != 1 {
            return Err(AppError::Config(
                "launch.transport_token must be a single token".into(),
            ));
        }

        Ok(())
    }
}
