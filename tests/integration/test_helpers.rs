//! Shared helpers for supervisor integration tests.
//!
//! Provides an in-memory [`NodeRpc`] whose answers tests can change while
//! the supervisor runs, shell scripts that impersonate the node binary,
//! and an event collector with timeouts so a missing signal fails a test
//! instead of hanging it.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;

use node_warden::health::rpc::{HeightReport, NodeInfo, NodeRpc, RpcFuture, TransactionsReport};
use node_warden::{AppError, NodeConfig, SupervisorEvent};

/// What the fake node answers on its RPC interface.
#[derive(Debug, Clone)]
pub enum RpcAnswer {
    /// Consistent answers at `height`, with the peers at `network_height`.
    Healthy { height: u64, network_height: u64 },
    /// `getheight` disagrees with `getinfo`.
    Inconsistent { height: u64 },
    /// Every query fails at transport level.
    Unreachable,
}

/// In-memory [`NodeRpc`] with a switchable answer.
#[derive(Debug, Clone)]
pub struct FakeRpc {
    answer: Arc<Mutex<RpcAnswer>>,
}

impl FakeRpc {
    pub fn new(answer: RpcAnswer) -> Self {
        Self {
            answer: Arc::new(Mutex::new(answer)),
        }
    }

    pub fn healthy(height: u64) -> Self {
        Self::new(RpcAnswer::Healthy {
            height,
            network_height: height,
        })
    }

    pub fn set(&self, answer: RpcAnswer) {
        *self.answer.lock().unwrap() = answer;
    }

    fn current(&self) -> RpcAnswer {
        self.answer.lock().unwrap().clone()
    }
}

fn unreachable(method: &str) -> AppError {
    AppError::Rpc(format!("could not get /{method}: connection refused"))
}

impl NodeRpc for FakeRpc {
    fn get_info(&self) -> RpcFuture<'_, NodeInfo> {
        let answer = self.current();
        Box::pin(async move {
            match answer {
                RpcAnswer::Healthy {
                    height,
                    network_height,
                } => Ok(NodeInfo {
                    height,
                    difficulty: 3000,
                    status: "OK".into(),
                    network_height,
                }),
                RpcAnswer::Inconsistent { height } => Ok(NodeInfo {
                    height,
                    difficulty: 3000,
                    status: "OK".into(),
                    network_height: height,
                }),
                RpcAnswer::Unreachable => Err(unreachable("getinfo")),
            }
        })
    }

    fn get_height(&self) -> RpcFuture<'_, HeightReport> {
        let answer = self.current();
        Box::pin(async move {
            match answer {
                RpcAnswer::Healthy { height, .. } => Ok(HeightReport {
                    height,
                    status: "OK".into(),
                }),
                RpcAnswer::Inconsistent { height } => Ok(HeightReport {
                    height: height.saturating_sub(1),
                    status: "OK".into(),
                }),
                RpcAnswer::Unreachable => Err(unreachable("getheight")),
            }
        })
    }

    fn get_transactions(&self) -> RpcFuture<'_, TransactionsReport> {
        let answer = self.current();
        Box::pin(async move {
            match answer {
                RpcAnswer::Unreachable => Err(unreachable("gettransactions")),
                _ => Ok(TransactionsReport {
                    status: "OK".into(),
                }),
            }
        })
    }
}

/// Console loop of a cooperative fake node: answers `help` with the help
/// banner and leaves on `exit`.
pub const COOPERATIVE_LOOP: &str = r#"while read -r cmd; do
  case "$cmd" in
    help) echo "help              Show this help" ;;
    exit) echo "Stopping node"; exit 0 ;;
  esac
done
"#;

/// Script body of a node that starts, claims sync and then behaves.
pub fn synced_node_script() -> String {
    format!(
        "echo \"Always exit TurtleCoind and Simplewallet with exit\"\n\
         echo \"SUCCESSFULLY SYNCHRONIZED WITH THE TURTLECOIN NETWORK\"\n\
         {COOPERATIVE_LOOP}"
    )
}

/// Write an executable `/bin/sh` script named `TurtleCoind` into `dir`.
#[cfg(unix)]
pub fn write_fake_node(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("TurtleCoind");
    std::fs::write(&path, format!("#!/bin/sh\n{body}")).expect("write fake node");
    let mut permissions = std::fs::metadata(&path).expect("metadata").permissions();
    permissions.set_mode(0o755);
    std::fs::set_permissions(&path, permissions).expect("chmod fake node");
    path
}

/// Configuration with short timings suitable for tests.
pub fn fast_config(binary: PathBuf, data_dir: PathBuf) -> NodeConfig {
    let mut config = NodeConfig::new(binary, data_dir);
    config.health.polling_interval_ms = 100;
    config.health.timeout_ms = 250;
    config.health.max_polling_failures = 3;
    config.sanitation.retry_delay_ms = 100;
    config
}

/// Wait for the first event matching `predicate`, returning it and every
/// event seen before it.
pub async fn wait_for<F>(
    events: &mut broadcast::Receiver<SupervisorEvent>,
    limit: Duration,
    mut predicate: F,
) -> (SupervisorEvent, Vec<SupervisorEvent>)
where
    F: FnMut(&SupervisorEvent) -> bool,
{
    let mut seen = Vec::new();
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        let event = tokio::time::timeout_at(deadline, events.recv())
            .await
            .unwrap_or_else(|_| panic!("timed out; events so far: {seen:#?}"))
            .expect("event channel open");
        if predicate(&event) {
            return (event, seen);
        }
        seen.push(event);
    }
}

/// Collect every event emitted during `period`.
pub async fn collect_for(
    events: &mut broadcast::Receiver<SupervisorEvent>,
    period: Duration,
) -> Vec<SupervisorEvent> {
    let mut seen = Vec::new();
    let deadline = tokio::time::Instant::now() + period;
    while let Ok(Ok(event)) = tokio::time::timeout_at(deadline, events.recv()).await {
        seen.push(event);
    }
    seen
}

/// Events without console output.
pub fn signals(events: &[SupervisorEvent]) -> Vec<&SupervisorEvent> {
    events
        .iter()
        .filter(|event| !matches!(event, SupervisorEvent::Data(_)))
        .collect()
}
