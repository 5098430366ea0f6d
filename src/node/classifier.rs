//! Console output classifier.
//!
//! Turns individual node console lines into lifecycle signals. The exact
//! marker text differs between node-binary generations, so markers live in
//! a [`MarkerSet`] that can be overridden from configuration without
//! touching the state machine.

use regex::Regex;

use crate::config::MarkerConfig;
use crate::{AppError, Result};

/// Start-confirmation markers printed once the node's P2P layer is up.
pub const DEFAULT_STARTED: &[&str] = &[
    r"(?i)p2p\s+initialized",
    r"Always exit TurtleCoind and Simplewallet with",
];

/// Markers by which the node claims to be synchronized with the network.
pub const DEFAULT_SYNCED: &[&str] = &[
    r"(?i)synchronized with (the )?(\w+ )?network",
    r"SYNCHRONIZED OK",
];

/// Help-banner markers echoed in response to the liveness probe.
pub const DEFAULT_HELP: &[&str] = &[r"Show this help"];

/// Lifecycle signal recognised in one console line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSignal {
    /// The node finished initialising its networking.
    Started,
    /// The node claims to be synchronized. Not trusted until corroborated
    /// by an explicit height comparison.
    SyncClaimed,
    /// The help banner appeared; answers a pending liveness probe.
    HelpEcho,
}

/// Compiled console markers for one node-binary generation.
#[derive(Debug, Clone)]
pub struct MarkerSet {
    started: Vec<Regex>,
    synced: Vec<Regex>,
    help: Vec<Regex>,
}

impl MarkerSet {
    /// Compile the built-in markers.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a built-in pattern fails to compile.
    pub fn defaults() -> Result<Self> {
        Self::from_config(&MarkerConfig::default())
    }

    /// Compile markers, replacing each built-in list whose override is
    /// non-empty.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` naming the first pattern that is not a
    /// valid regular expression.
    pub fn from_config(config: &MarkerConfig) -> Result<Self> {
        Ok(Self {
            started: compile("started", &config.started, DEFAULT_STARTED)?,
            synced: compile("synced", &config.synced, DEFAULT_SYNCED)?,
            help: compile("help", &config.help, DEFAULT_HELP)?,
        })
    }

    /// Classify one console line.
    ///
    /// Sync claims win over start confirmations when a line carries both,
    /// and the help banner is checked last.
    #[must_use]
    pub fn classify(&self, line: &str) -> Option<OutputSignal> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        if matches_any(&self.synced, line) {
            Some(OutputSignal::SyncClaimed)
        } else if matches_any(&self.started, line) {
            Some(OutputSignal::Started)
        } else if matches_any(&self.help, line) {
            Some(OutputSignal::HelpEcho)
        } else {
            None
        }
    }
}

fn matches_any(patterns: &[Regex], line: &str) -> bool {
    patterns.iter().any(|pattern| pattern.is_match(line))
}

fn compile(kind: &str, overrides: &[String], defaults: &[&str]) -> Result<Vec<Regex>> {
    let sources: Vec<&str> = if overrides.is_empty() {
        defaults.to_vec()
    } else {
        overrides.iter().map(String::as_str).collect()
    };

    sources
        .into_iter()
        .map(|source| {
            Regex::new(source).map_err(|err| {
                AppError::Config(format!("invalid {kind} marker `{source}`: {err}"))
            })
        })
        .collect()
}
