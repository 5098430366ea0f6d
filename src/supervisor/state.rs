//! Lifecycle state and the public signal surface.

use std::fmt::{Display, Formatter};

use crate::health::cycle::HealthSnapshot;
use crate::AppError;

/// Where the supervised node is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// No process is running.
    Stopped,
    /// Process spawned; waiting for a sync claim.
    Starting,
    /// A sync claim is being corroborated by a height query.
    WaitingForSyncConfirmation,
    /// Sync corroborated; health monitoring armed, no cycle completed yet.
    Synced,
    /// Last cycle was healthy.
    Monitoring,
    /// Last cycle found the node too far from the network height.
    Desynced,
}

impl LifecycleState {
    /// Whether health cycles run in this state.
    #[must_use]
    pub fn is_monitored(self) -> bool {
        matches!(self, Self::Synced | Self::Monitoring | Self::Desynced)
    }
}

impl Display for LifecycleState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::WaitingForSyncConfirmation => "waiting_for_sync_confirmation",
            Self::Synced => "synced",
            Self::Monitoring => "monitoring",
            Self::Desynced => "desynced",
        };
        f.write_str(name)
    }
}

/// Signals emitted by the supervisor to its subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// The node process was spawned with these arguments.
    Start {
        /// Arguments passed to the node binary.
        args: Vec<String>,
    },
    /// The node printed its start-confirmation marker.
    Started,
    /// A sync claim was corroborated; health monitoring is armed.
    Synced,
    /// A healthy cycle completed.
    Ready(HealthSnapshot),
    /// The node answered but its height deviates too far from the network.
    Desync {
        /// Local block height.
        height: u64,
        /// Height reported by the node's peers.
        network_height: u64,
        /// Absolute difference of the two.
        deviance: u64,
    },
    /// The node must be considered dead; the owner should restart it.
    Down {
        /// Why the node was declared down.
        reason: String,
    },
    /// The node process is gone.
    Stopped {
        /// Exit code, `None` if it died from a signal or was never observed.
        exit_code: Option<i32>,
    },
    /// Informational notice (sanitation, first run, retries).
    Info(String),
    /// A failure that did not stop the supervisor.
    Error(AppError),
    /// One raw console line from the node.
    Data(String),
}
