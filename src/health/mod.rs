//! Node health checking.
//!
//! - `rpc`: the [`NodeRpc`](rpc::NodeRpc) seam and its HTTP implementation.
//! - `cycle`: one health cycle (three RPC queries plus the console probe)
//!   and its consistency verdict.
//! - `debounce`: turns consecutive failed cycles into one delayed "down".

pub mod cycle;
pub mod debounce;
pub mod rpc;
