//! The supervised node binary.
//!
//! - `args`: command-line flags derived from [`NodeConfig`](crate::NodeConfig).
//! - `codec`: line framing for the node's console output.
//! - `classifier`: console markers turned into lifecycle signals.
//! - `process`: spawning, console I/O tasks, and forceful termination.

pub mod args;
pub mod classifier;
pub mod codec;
pub mod process;
