//! Pre-start sanitation.
//!
//! Runs before every launch: verifies the binary, clears a stale database
//! lock (or postpones the launch while it exists), creates the data
//! directory on first run, and optionally drops persisted peer state.

use std::fs;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::NodeConfig;
use crate::{AppError, Result};

/// What the supervisor should do after sanitation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SanitationOutcome {
    /// Launch now. `notices` are informational messages for subscribers.
    Proceed {
        /// Informational messages collected during sanitation.
        notices: Vec<String>,
    },
    /// A stale lock blocks the launch; try again after `delay`.
    Retry {
        /// Delay before the next start attempt.
        delay: Duration,
        /// Informational message for subscribers.
        notice: String,
    },
}

/// Prepare the filesystem for a launch.
///
/// The binary check comes first so a missing binary is always fatal, even
/// when a stale lock would otherwise postpone the start.
///
/// # Errors
///
/// Returns `AppError::Config` if the binary does not exist, and
/// `AppError::Io` if the data directory cannot be created.
pub fn sanitize(config: &NodeConfig) -> Result<SanitationOutcome> {
    if !config.binary_path.exists() {
        return Err(AppError::Config(format!(
            "node binary not found at {}",
            config.binary_path.display()
        )));
    }

    let lock = config.db_lock_path();
    if lock.exists() {
        let delay = config.sanitation.retry_delay();
        if !config.sanitation.clear_db_lock {
            warn!(path = %lock.display(), "database lock present, postponing start");
            return Ok(SanitationOutcome::Retry {
                delay,
                notice: format!(
                    "database lock file {} present; retrying start in {}ms",
                    lock.display(),
                    delay.as_millis()
                ),
            });
        }

        let notice = match fs::remove_file(&lock) {
            Ok(()) => {
                info!(path = %lock.display(), "removed stale database lock");
                format!(
                    "removed stale database lock file {}; retrying start in {}ms",
                    lock.display(),
                    delay.as_millis()
                )
            }
            Err(err) => {
                warn!(path = %lock.display(), %err, "failed to remove database lock");
                format!(
                    "could not remove database lock file {}: {err}; retrying start in {}ms",
                    lock.display(),
                    delay.as_millis()
                )
            }
        };
        return Ok(SanitationOutcome::Retry { delay, notice });
    }

    let mut notices = Vec::new();

    if !config.data_dir.exists() {
        fs::create_dir_all(&config.data_dir).map_err(|err| {
            AppError::Io(format!(
                "failed to create data directory {}: {err}",
                config.data_dir.display()
            ))
        })?;
        info!(path = %config.data_dir.display(), "created data directory");
        notices.push(format!(
            "data directory {} did not exist and was created; first run, the node will sync from scratch",
            config.data_dir.display()
        ));
    }

    if config.sanitation.clear_p2p_state {
        let state = config.p2p_state_path();
        if state.exists() {
            match fs::remove_file(&state) {
                Ok(()) => {
                    info!(path = %state.display(), "removed peer state");
                    notices.push(format!(
                        "removed peer state file {} to force fresh peer discovery",
                        state.display()
                    ));
                }
                Err(err) => {
                    warn!(path = %state.display(), %err, "failed to remove peer state");
                    notices.push(format!(
                        "could not remove peer state file {}: {err}",
                        state.display()
                    ));
                }
            }
        }
    }

    Ok(SanitationOutcome::Proceed { notices })
}
