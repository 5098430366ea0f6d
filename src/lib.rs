#![forbid(unsafe_code)]

//! Supervisor for a long-running blockchain node daemon.
//!
//! Launches the node binary, classifies its console output, validates its
//! health through the node's RPC interface plus a console liveness probe,
//! debounces transient failures, and reports lifecycle signals to an
//! owner that decides when to restart it.

pub mod config;
pub mod errors;
pub mod health;
pub mod node;
pub mod supervisor;

pub use config::NodeConfig;
pub use errors::{AppError, Result};
pub use supervisor::{LifecycleState, Supervisor, SupervisorEvent};
