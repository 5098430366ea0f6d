//! Error types shared across the supervisor.

use std::fmt::{Display, Formatter};

/// Shared supervisor result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Supervisor error enumeration covering all domain failure modes.
///
/// Every variant carries a human-readable message. The type is `Clone` so
/// it can be delivered to several subscribers through
/// [`SupervisorEvent::Error`](crate::supervisor::SupervisorEvent::Error).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Configuration parsing or validation failure, including a missing
    /// node binary. Never retried.
    Config(String),
    /// Spawning the node, writing to its control channel, or reading its
    /// output stream failed.
    Process(String),
    /// A query against the node's RPC interface failed at transport or
    /// decode level.
    Rpc(String),
    /// A health cycle failed a consistency or liveness check.
    Health(String),
    /// Command not valid in the current lifecycle state, or the
    /// supervisor task is gone.
    Lifecycle(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Process(msg) => write!(f, "process: {msg}"),
            Self::Rpc(msg) => write!(f, "rpc: {msg}"),
            Self::Health(msg) => write!(f, "health: {msg}"),
            Self::Lifecycle(msg) => write!(f, "lifecycle: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        Self::Rpc(err.to_string())
    }
}
