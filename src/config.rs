//! Client configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{AcpError, Result};

/// Default agent command name when none is configured.
const DEFAULT_COMMAND: &str = "kiro-cli";

fn default_command() -> String {
    DEFAULT_COMMAND.to_owned()
}

fn default_args() -> Vec<String> {
    vec!["acp".to_owned()]
}

/// Client configuration parsed from `config.toml` or built in code.
///
/// Only three values matter to the protocol: the agent command, the
/// working directory handed to the agent, and the initial edit-mode
/// flag. The rest tunes where state lives and where the agent routes
/// its own debug logs.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ClientConfig {
    /// Agent binary name or absolute path (e.g., `kiro-cli`).
    #[serde(default = "default_command")]
    pub command: String,
    /// Arguments passed to the agent binary before any protocol traffic.
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    /// Working directory handed to the agent on session creation.
    pub cwd: PathBuf,
    /// Whether tool calls that edit files are auto-approved at startup.
    ///
    /// Togglable at runtime through the client facade.
    #[serde(default)]
    pub edit_mode: bool,
    /// Directory holding the persisted session record.
    ///
    /// Defaults to the platform data directory under `ghostwriter`.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
    /// When set, route the agent's own debug logs to this file via the
    /// child environment.
    #[serde(default)]
    pub debug_log_file: Option<PathBuf>,
}

impl ClientConfig {
    /// Build a configuration with defaults for everything but the
    /// working directory.
    #[must_use]
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            command: default_command(),
            args: default_args(),
            cwd: cwd.into(),
            edit_mode: false,
            state_dir: None,
            debug_log_file: None,
        }
    }

    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AcpError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AcpError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AcpError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Directory holding the persisted session record.
    ///
    /// Falls back to `<platform data dir>/ghostwriter`, then to the
    /// working directory when no platform directory is known.
    #[must_use]
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .map_or_else(|| self.cwd.clone(), |base| base.join("ghostwriter"))
        })
    }

    /// Path of the persisted session record file.
    #[must_use]
    pub fn session_file(&self) -> PathBuf {
        self.state_dir().join("acp-session.json")
    }

    /// Validate field-level invariants.
    ///
    /// # Errors
    ///
    /// Returns `AcpError::Config` when the command is empty or the
    /// working directory is not absolute.
    pub fn validate(&self) -> Result<()> {
        if self.command.trim().is_empty() {
            return Err(AcpError::Config("command must not be empty".into()));
        }
        if !self.cwd.is_absolute() {
            return Err(AcpError::Config(format!(
                "cwd must be an absolute path, got '{}'",
                self.cwd.display()
            )));
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
