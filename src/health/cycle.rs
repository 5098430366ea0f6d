//! One health cycle.
//!
//! A cycle runs four checks concurrently and joins them with an
//! all-must-succeed barrier:
//! 1. `getinfo` (height, difficulty, status, network height),
//! 2. `getheight`,
//! 3. `gettransactions`,
//! 4. the console liveness probe: write `help` and wait up to
//!    [`PROBE_TIMEOUT`] for the help banner.
//!
//! The three RPC answers must agree on height and status. A node that
//! answers HTTP but no longer reads its console fails the probe even when
//! every query succeeds.

use std::fmt::{Display, Formatter};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use crate::config::HealthConfig;
use crate::health::rpc::{HeightReport, NodeInfo, NodeRpc, TransactionsReport};
use crate::{AppError, Result};

/// Network block-target time in seconds, used to derive the hash rate.
pub const BLOCK_TARGET_SECS: u64 = 30;

/// How long the probe waits for the help banner.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Console command whose output answers the probe.
pub const PROBE_COMMAND: &str = "help";

/// Derived network hash rate: `difficulty / 30`, rounded half up.
#[must_use]
pub fn hash_rate(difficulty: u64) -> u64 {
    difficulty.saturating_add(BLOCK_TARGET_SECS / 2) / BLOCK_TARGET_SECS
}

/// Absolute difference between local and network height.
#[must_use]
pub fn deviance(height: u64, network_height: u64) -> u64 {
    height.abs_diff(network_height)
}

/// Per-cycle view of node health, emitted with the `Ready` signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    /// Local block height.
    pub height: u64,
    /// Current network difficulty.
    pub difficulty: u64,
    /// Node status string.
    pub status: String,
    /// Height reported by the node's peers.
    pub network_height: u64,
    /// Derived network hash rate in H/s.
    pub hash_rate: u64,
    /// When the cycle completed.
    pub observed_at: DateTime<Utc>,
}

impl HealthSnapshot {
    /// Build a snapshot from a `getinfo` answer.
    #[must_use]
    pub fn from_info(info: &NodeInfo) -> Self {
        Self {
            height: info.height,
            difficulty: info.difficulty,
            status: info.status.clone(),
            network_height: info.network_height,
            hash_rate: hash_rate(info.difficulty),
            observed_at: Utc::now(),
        }
    }

    /// Distance between local and network height.
    #[must_use]
    pub fn deviance(&self) -> u64 {
        deviance(self.height, self.network_height)
    }
}

/// Why a cycle failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthFailure {
    /// At least one RPC query failed.
    Unreachable(String),
    /// Every query answered but height or status disagreed.
    Inconsistent,
    /// The console never echoed the help banner.
    ProbeTimeout,
}

impl Display for HealthFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unreachable(msg) => write!(f, "node is not passing checks: {msg}"),
            Self::Inconsistent => write!(f, "node is returning inconsistent results"),
            Self::ProbeTimeout => write!(f, "node console is unresponsive"),
        }
    }
}

impl From<HealthFailure> for AppError {
    fn from(failure: HealthFailure) -> Self {
        match failure {
            HealthFailure::Unreachable(_) => Self::Rpc(failure.to_string()),
            HealthFailure::Inconsistent | HealthFailure::ProbeTimeout => {
                Self::Health(failure.to_string())
            }
        }
    }
}

/// Verdict of one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Healthy and within the allowed height deviance.
    Ready(HealthSnapshot),
    /// The node answered but is too far from the network height.
    Desynced {
        /// Snapshot taken from `getinfo`.
        snapshot: HealthSnapshot,
        /// Height deviance that exceeded the threshold.
        deviance: u64,
        /// Set when the console probe also failed in this cycle.
        failure: Option<HealthFailure>,
    },
    /// The cycle failed.
    Failed(HealthFailure),
}

impl CycleOutcome {
    /// Whether the node counts as alive for debouncing. A desynced node
    /// answered, so it is alive unless its console probe failed.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        matches!(
            self,
            Self::Ready(_) | Self::Desynced { failure: None, .. }
        )
    }
}

/// Desync settings applied when judging a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleSettings {
    /// Compare local height against network height.
    pub check_height: bool,
    /// Largest deviance still considered in sync.
    pub max_deviance: u64,
}

impl From<&HealthConfig> for CycleSettings {
    fn from(config: &HealthConfig) -> Self {
        Self {
            check_height: config.check_height,
            max_deviance: config.max_deviance,
        }
    }
}

/// One liveness probe attempt.
///
/// `echo` must be a fresh receiver created for this attempt; the
/// supervisor resolves it when the classifier sees the help banner, so a
/// banner printed before the attempt started cannot answer it.
#[derive(Debug)]
pub struct Probe {
    commands: mpsc::Sender<String>,
    echo: oneshot::Receiver<()>,
    timeout: Duration,
}

impl Probe {
    /// Probe over `commands`, answered through `echo`, with [`PROBE_TIMEOUT`].
    #[must_use]
    pub fn new(commands: mpsc::Sender<String>, echo: oneshot::Receiver<()>) -> Self {
        Self {
            commands,
            echo,
            timeout: PROBE_TIMEOUT,
        }
    }

    /// Override the echo timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send the probe command and wait for the echo. Queueing the command
    /// and waiting for the echo share one timeout.
    ///
    /// # Errors
    ///
    /// Returns [`HealthFailure::ProbeTimeout`] if the command cannot be
    /// queued or the echo does not arrive in time.
    pub async fn run(self) -> std::result::Result<(), HealthFailure> {
        let Self {
            commands,
            echo,
            timeout,
        } = self;
        let attempt = async move {
            commands
                .send(PROBE_COMMAND.to_owned())
                .await
                .map_err(|_| HealthFailure::ProbeTimeout)?;
            echo.await.map_err(|_| HealthFailure::ProbeTimeout)
        };
        tokio::time::timeout(timeout, attempt)
            .await
            .unwrap_or(Err(HealthFailure::ProbeTimeout))
    }
}

/// Run one cycle: the three queries and the probe concurrently, then judge.
pub async fn run_cycle(rpc: &dyn NodeRpc, probe: Probe, settings: CycleSettings) -> CycleOutcome {
    let (info, height, transactions, probe) = tokio::join!(
        rpc.get_info(),
        rpc.get_height(),
        rpc.get_transactions(),
        probe.run(),
    );
    evaluate(info, height, transactions, probe, settings)
}

/// Judge the joined results of one cycle.
///
/// Query failures win over a probe timeout. When every query answered, a
/// deviance above `max_deviance` reports [`CycleOutcome::Desynced`] even if
/// the answers were also inconsistent, carrying a probe timeout in
/// `failure`. Otherwise a probe timeout, then any height or status
/// mismatch, fails the whole cycle.
#[must_use]
pub fn evaluate(
    info: Result<NodeInfo>,
    height: Result<HeightReport>,
    transactions: Result<TransactionsReport>,
    probe: std::result::Result<(), HealthFailure>,
    settings: CycleSettings,
) -> CycleOutcome {
    let (info, height, transactions) = match (info, height, transactions) {
        (Ok(info), Ok(height), Ok(transactions)) => (info, height, transactions),
        (info, height, transactions) => {
            let reason = [info.err(), height.err(), transactions.err()]
                .into_iter()
                .flatten()
                .map(|err| err.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return CycleOutcome::Failed(HealthFailure::Unreachable(reason));
        }
    };

    let snapshot = HealthSnapshot::from_info(&info);

    if settings.check_height {
        let deviance = snapshot.deviance();
        if deviance > settings.max_deviance {
            return CycleOutcome::Desynced {
                snapshot,
                deviance,
                failure: probe.err(),
            };
        }
    }

    if let Err(failure) = probe {
        return CycleOutcome::Failed(failure);
    }

    let consistent = info.height == height.height
        && info.status == height.status
        && height.status == transactions.status;
    if !consistent {
        return CycleOutcome::Failed(HealthFailure::Inconsistent);
    }

    CycleOutcome::Ready(snapshot)
}
