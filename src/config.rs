//! Supervisor configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::node::classifier::MarkerSet;
use crate::{AppError, Result};

/// RPC interface settings for the supervised node.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RpcConfig {
    /// Address the node binds its RPC server to.
    #[serde(default = "default_rpc_bind_ip")]
    pub bind_ip: String,
    /// Port the node binds its RPC server to.
    #[serde(default = "default_rpc_bind_port")]
    pub bind_port: u16,
    /// Value for the node's CORS header, if enabled.
    #[serde(default)]
    pub enable_cors: Option<String>,
    /// Enable the node's block explorer endpoints.
    #[serde(default)]
    pub enable_block_explorer: bool,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            bind_ip: default_rpc_bind_ip(),
            bind_port: default_rpc_bind_port(),
            enable_cors: None,
            enable_block_explorer: false,
        }
    }
}

/// Peer-to-peer networking settings.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct P2pConfig {
    /// Address the node binds its P2P listener to.
    #[serde(default)]
    pub bind_ip: Option<String>,
    /// Port the node binds its P2P listener to.
    #[serde(default)]
    pub bind_port: Option<u16>,
    /// Port advertised to peers when behind NAT.
    #[serde(default)]
    pub external_port: Option<u16>,
    /// Accept peers on local addresses.
    #[serde(default)]
    pub allow_local_ip: bool,
    /// Do not advertise our port to peers.
    #[serde(default)]
    pub hide_my_port: bool,
    /// Additional peers.
    #[serde(default)]
    pub peers: Vec<String>,
    /// Peers the node always tries to stay connected to.
    #[serde(default)]
    pub priority_nodes: Vec<String>,
    /// Restrict connections to these peers only.
    #[serde(default)]
    pub exclusive_nodes: Vec<String>,
    /// Seed nodes used for initial peer discovery.
    #[serde(default)]
    pub seed_nodes: Vec<String>,
}

/// Node database tuning values. Unset values use the node's own defaults.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Database worker threads.
    #[serde(default)]
    pub threads: Option<u32>,
    /// Maximum open database files.
    #[serde(default)]
    pub max_open_files: Option<u32>,
    /// Write buffer size in megabytes.
    #[serde(default)]
    pub write_buffer_size: Option<u32>,
    /// Read cache size in megabytes.
    #[serde(default)]
    pub read_cache_size: Option<u32>,
}

/// Health-check cadence and thresholds.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct HealthConfig {
    /// Interval between health cycles.
    #[serde(default = "default_polling_interval_ms")]
    pub polling_interval_ms: u64,
    /// Per-RPC-call timeout.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Consecutive failed cycles tolerated before the node is declared down.
    #[serde(default = "default_max_polling_failures")]
    pub max_polling_failures: u32,
    /// Compare local height against network height each cycle.
    #[serde(default = "default_true")]
    pub check_height: bool,
    /// Largest height deviance still considered in sync.
    #[serde(default = "default_max_deviance")]
    pub max_deviance: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            polling_interval_ms: default_polling_interval_ms(),
            timeout_ms: default_timeout_ms(),
            max_polling_failures: default_max_polling_failures(),
            check_height: true,
            max_deviance: default_max_deviance(),
        }
    }
}

impl HealthConfig {
    /// Interval between health cycles.
    #[must_use]
    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }

    /// Per-RPC-call timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Time from the first failed cycle until the node is declared down.
    #[must_use]
    pub fn down_window(&self) -> Duration {
        self.polling_interval() * self.max_polling_failures
    }

    /// Time allowed for a graceful exit before the node is force-terminated.
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        self.timeout() * 2
    }
}

/// Pre-start cleanup of on-disk artifacts left by a previous run.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SanitationConfig {
    /// Delete a stale database lock file before launching.
    #[serde(default = "default_true")]
    pub clear_db_lock: bool,
    /// Delete the persisted peer state to force fresh peer discovery.
    #[serde(default)]
    pub clear_p2p_state: bool,
    /// Delay before a start blocked by a stale lock is retried.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for SanitationConfig {
    fn default() -> Self {
        Self {
            clear_db_lock: true,
            clear_p2p_state: false,
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl SanitationConfig {
    /// Delay before a start blocked by a stale lock is retried.
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Console marker overrides for node-binary versions with different output.
///
/// Each list holds regular expressions; an empty list keeps the built-in
/// defaults for that marker.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct MarkerConfig {
    /// Start-confirmation patterns.
    #[serde(default)]
    pub started: Vec<String>,
    /// Sync-claim patterns.
    #[serde(default)]
    pub synced: Vec<String>,
    /// Help-banner patterns used as the liveness-probe echo.
    #[serde(default)]
    pub help: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_rpc_bind_ip() -> String {
    "127.0.0.1".into()
}

fn default_rpc_bind_port() -> u16 {
    11898
}

fn default_polling_interval_ms() -> u64 {
    2000
}

fn default_timeout_ms() -> u64 {
    2000
}

fn default_max_polling_failures() -> u32 {
    3
}

fn default_max_deviance() -> u64 {
    5
}

fn default_retry_delay_ms() -> u64 {
    5000
}

/// Supervisor configuration parsed from `node-warden.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct NodeConfig {
    /// Path to the node binary.
    pub binary_path: PathBuf,
    /// Node data directory; created on first run.
    pub data_dir: PathBuf,
    /// Run the node against the test network.
    #[serde(default)]
    pub testnet: bool,
    /// Checkpoint file passed to the node on launch.
    #[serde(default)]
    pub load_checkpoints: Option<PathBuf>,
    /// RPC interface settings.
    #[serde(default)]
    pub rpc: RpcConfig,
    /// Peer-to-peer settings.
    #[serde(default)]
    pub p2p: P2pConfig,
    /// Database tuning.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Health-check cadence and thresholds.
    #[serde(default)]
    pub health: HealthConfig,
    /// Pre-start cleanup toggles.
    #[serde(default)]
    pub sanitation: SanitationConfig,
    /// Console marker overrides.
    #[serde(default)]
    pub markers: MarkerConfig,
}

impl NodeConfig {
    /// Build a configuration with defaults for everything except the two
    /// required paths.
    #[must_use]
    pub fn new(binary_path: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary_path: binary_path.into(),
            data_dir: data_dir.into(),
            testnet: false,
            load_checkpoints: None,
            rpc: RpcConfig::default(),
            p2p: P2pConfig::default(),
            database: DatabaseConfig::default(),
            health: HealthConfig::default(),
            sanitation: SanitationConfig::default(),
            markers: MarkerConfig::default(),
        }
    }

    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Host the supervisor queries for RPC; a wildcard bind is reached
    /// through loopback.
    #[must_use]
    pub fn rpc_query_host(&self) -> &str {
        if self.rpc.bind_ip == "0.0.0.0" {
            "127.0.0.1"
        } else {
            &self.rpc.bind_ip
        }
    }

    /// Base URL of the node's RPC interface, without a trailing slash.
    #[must_use]
    pub fn rpc_base_url(&self) -> String {
        format!("http://{}:{}", self.rpc_query_host(), self.rpc.bind_port)
    }

    /// Database lock file left behind by an unclean shutdown.
    #[must_use]
    pub fn db_lock_path(&self) -> PathBuf {
        self.data_dir.join("DB").join("LOCK")
    }

    /// Persisted peer state.
    #[must_use]
    pub fn p2p_state_path(&self) -> PathBuf {
        self.data_dir.join("p2pstate.bin")
    }

    /// Compile the console markers, applying any configured overrides.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if an override pattern is not a valid
    /// regular expression.
    pub fn marker_set(&self) -> Result<MarkerSet> {
        MarkerSet::from_config(&self.markers)
    }

    /// Validate values that the type system cannot express.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.health.polling_interval_ms == 0 {
            return Err(AppError::Config(
                "health.polling_interval_ms must be greater than zero".into(),
            ));
        }
        if self.health.timeout_ms == 0 {
            return Err(AppError::Config(
                "health.timeout_ms must be greater than zero".into(),
            ));
        }
        if self.health.max_polling_failures == 0 {
            return Err(AppError::Config(
                "health.max_polling_failures must be greater than zero".into(),
            ));
        }
        if self.binary_path.as_os_str().is_empty() {
            return Err(AppError::Config("binary_path must not be empty".into()));
        }
        if self.data_dir.as_os_str().is_empty() {
            return Err(AppError::Config("data_dir must not be empty".into()));
        }
        self.marker_set()?;
        Ok(())
    }
}
