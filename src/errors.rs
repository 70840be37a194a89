//! Error types shared across the crate.

use std::fmt::{Display, Formatter};

/// Shared crate result type.
pub type Result<T> = std::result::Result<T, AcpError>;

/// Crate error enumeration covering all client failure modes.
#[derive(Debug, Clone)]
pub enum AcpError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// The configured agent command did not resolve on the search path.
    BinaryNotFound(String),
    /// The agent process exited or errored while work was outstanding.
    ProcessExited(String),
    /// No response arrived within the request deadline.
    RequestTimeout(String),
    /// The agent answered a request with an error object.
    Agent(String),
    /// The operation raced an in-progress disposal.
    Disposed(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AcpError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::BinaryNotFound(msg) => write!(f, "binary not found: {msg}"),
            Self::ProcessExited(msg) => write!(f, "process exited: {msg}"),
            Self::RequestTimeout(msg) => write!(f, "request timed out: {msg}"),
            Self::Agent(msg) => write!(f, "agent error: {msg}"),
            Self::Disposed(msg) => write!(f, "disposed: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AcpError {}

impl From<toml::de::Error> for AcpError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AcpError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
