//! Agent process spawner.
//!
//! Produces a running `kiro-cli acp` child whose three pipes are ready
//! for framed reads and writes, or fails cleanly:
//!
//! 1. Compute a search path: the current `PATH`, extended with the user
//!    shell's interactive-login `PATH` (best-effort) and a fixed
//!    allowlist of user-local binary directories. App-bundle and
//!    service launches start with a minimal environment, so tools
//!    installed via package managers are often missing from the
//!    inherited `PATH`.
//! 2. Resolve the configured command against that path; abort with
//!    [`AcpError::BinaryNotFound`] before spawning anything.
//! 3. Spawn with piped stdio and `kill_on_drop(true)`, the computed
//!    `PATH` in the child environment, and optional debug-log routing
//!    variables.
//!
//! The stderr pipe is drained by a logging task; process exit is
//! observed by [`monitor_exit`].

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::{AcpError, Result};

/// User-local binary directories appended to the search path.
///
/// Relative entries are resolved against the home directory.
const USER_LOCAL_BIN_DIRS: &[&str] = &[
    ".local/bin",
    "bin",
    ".cargo/bin",
    ".npm-global/bin",
    "/usr/local/bin",
    "/opt/homebrew/bin",
];

/// A spawned agent process with its protocol pipes captured.
///
/// stderr is already being drained by a logging task; the caller wires
/// `stdin`/`stdout` to the router and hands `child` to [`monitor_exit`].
#[derive(Debug)]
pub struct SpawnedAgent {
    /// Child process handle; `kill_on_drop` is set.
    pub child: Child,
    /// Agent's stdin for outbound frames.
    pub stdin: ChildStdin,
    /// Agent's stdout for inbound frames.
    pub stdout: ChildStdout,
}

/// Spawn the configured agent command.
///
/// # Errors
///
/// - [`AcpError::BinaryNotFound`] when the command does not resolve on
///   the computed search path.
/// - [`AcpError::Io`] when the OS-level spawn or pipe capture fails.
pub async fn spawn_agent(config: &ClientConfig) -> Result<SpawnedAgent> {
    let search_path = compute_search_path();
    let Some(binary) = resolve_command(&config.command, &search_path) else {
        warn!(
            command = %config.command,
            search_path = %search_path.to_string_lossy(),
            "spawner: command not found on search path"
        );
        return Err(AcpError::BinaryNotFound(format!(
            "cannot find command '{}'",
            config.command
        )));
    };

    info!(binary = %binary.display(), cwd = %config.cwd.display(), "spawner: starting agent");

    let mut cmd = Command::new(&binary);
    cmd.args(&config.args)
        .current_dir(&config.cwd)
        .env("PATH", &search_path)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);

    if let Some(ref log_file) = config.debug_log_file {
        cmd.env("KIRO_LOG_FILE", log_file);
        cmd.env("KIRO_LOG_LEVEL", "debug");
    }

    let mut child = cmd
        .spawn()
        .map_err(|err| AcpError::Io(format!("failed to spawn agent: {err}")))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AcpError::Io("failed to capture agent stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AcpError::Io("failed to capture agent stdout".into()))?;

    if let Some(stderr) = child.stderr.take() {
        spawn_stderr_logger(stderr);
    }

    Ok(SpawnedAgent {
        child,
        stdin,
        stdout,
    })
}

/// Spawn a background task that awaits child exit and reports the reason.
///
/// On exit (or wait error) the reason is sent through `exit_tx`; the
/// receiver runs the connection cleanup. When `cancel` fires first the
/// task exits silently, dropping the child — `kill_on_drop` terminates
/// the process and the disposal path owns cleanup.
#[must_use]
pub fn monitor_exit(
    mut child: Child,
    exit_tx: oneshot::Sender<String>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            result = child.wait() => {
                let reason = match result {
                    Ok(status) => status.code().map_or_else(
                        || "agent process terminated by signal".to_owned(),
                        |code| format!("agent process exited with code {code}"),
                    ),
                    Err(err) => format!("wait error: {err}"),
                };
                warn!(reason = reason.as_str(), "spawner: agent process ended");
                let _ = exit_tx.send(reason);
            }
            () = cancel.cancelled() => {
                debug!("spawner: exit monitor cancelled, dropping child");
            }
        }
    })
}

/// Drain the agent's stderr, logging each line.
fn spawn_stderr_logger(stderr: tokio::process::ChildStderr) {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stderr);
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let trimmed = line.trim();
                    if !trimmed.is_empty() {
                        warn!(line = trimmed, "agent stderr");
                    }
                }
            }
        }
    });
}

// ── Search path ──────────────────────────────────────────────────────────────

/// Compute the search path used to resolve and run the agent command.
///
/// Order: current `PATH`, then the shell's interactive-login `PATH`,
/// then [`USER_LOCAL_BIN_DIRS`]. Duplicates are dropped.
#[must_use]
pub fn compute_search_path() -> OsString {
    let mut entries: Vec<PathBuf> = Vec::new();

    if let Some(current) = std::env::var_os("PATH") {
        entries.extend(std::env::split_paths(&current));
    }

    if let Some(shell_path) = resolve_shell_path() {
        for dir in std::env::split_paths(&shell_path) {
            if !entries.contains(&dir) {
                entries.push(dir);
            }
        }
    }

    let home = dirs::home_dir();
    for entry in USER_LOCAL_BIN_DIRS {
        let dir = if Path::new(entry).is_absolute() {
            PathBuf::from(entry)
        } else if let Some(ref home) = home {
            home.join(entry)
        } else {
            continue;
        };
        if !entries.contains(&dir) {
            entries.push(dir);
        }
    }

    std::env::join_paths(entries)
        .unwrap_or_else(|_| std::env::var_os("PATH").unwrap_or_default())
}

/// Get the full `PATH` from the user's interactive login shell.
///
/// Shell profiles often configure `PATH` inside an interactive-only
/// guard, so a plain login shell would miss nvm, homebrew, and friends.
/// `-lic` sources everything; piped stdio keeps readline from emitting
/// control sequences. Any failure returns `None`.
fn resolve_shell_path() -> Option<String> {
    let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_owned());
    let output = std::process::Command::new(&shell)
        .args(["-lic", r#"printf "%s" "$PATH""#])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::null())
        .output()
        .ok()?;
    if output.status.success() {
        let path = String::from_utf8_lossy(&output.stdout).trim().to_owned();
        if !path.is_empty() {
            return Some(path);
        }
    }
    None
}

/// Resolve a command name to an absolute path on the given search path.
///
/// Absolute inputs are checked directly; bare names are tried against
/// each directory in order.
#[must_use]
pub fn resolve_command(command: &str, search_path: &OsString) -> Option<PathBuf> {
    if command.is_empty() {
        return None;
    }
    let path = Path::new(command);
    if path.is_absolute() {
        return path.is_file().then(|| path.to_path_buf());
    }
    for dir in std::env::split_paths(search_path) {
        let candidate = dir.join(command);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

// ── Tests ─────────────────────────────────────────────────────────────────────
