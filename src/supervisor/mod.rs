//! Node supervisor.
//!
//! [`Supervisor`] is a cheap handle to a background control task that owns
//! the node process and all lifecycle state. Commands go in through the
//! handle; everything the supervisor observes comes out as
//! [`SupervisorEvent`]s on a broadcast channel.
//!
//! The supervisor never restarts the node on its own. It emits `Down` and
//! leaves the decision to its owner, which typically calls
//! [`Supervisor::stop`] followed by [`Supervisor::start`].

pub mod control;
pub mod sanitation;
pub mod state;

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

pub use state::{LifecycleState, SupervisorEvent};

use crate::config::NodeConfig;
use crate::health::rpc::{HttpRpc, NodeRpc};
use crate::{AppError, Result};
use control::{spawn_control, Command};

/// Capacity of the event channel. Slow subscribers see `Lagged`.
pub const EVENT_CAPACITY: usize = 1024;

const COMMAND_BUFFER: usize = 32;

/// Handle to a running supervisor.
#[derive(Debug)]
pub struct Supervisor {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<SupervisorEvent>,
    task: JoinHandle<()>,
}

impl Supervisor {
    /// Supervisor querying the node over HTTP at the configured RPC
    /// address. Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the configuration is invalid and
    /// `AppError::Rpc` if the HTTP client cannot be built.
    pub fn new(config: NodeConfig) -> Result<Self> {
        let rpc = HttpRpc::new(config.rpc_base_url(), config.health.timeout())?;
        Self::with_rpc(config, Arc::new(rpc))
    }

    /// Supervisor using a caller-provided RPC implementation.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the configuration is invalid.
    pub fn with_rpc(config: NodeConfig, rpc: Arc<dyn NodeRpc>) -> Result<Self> {
        config.validate()?;
        let markers = config.marker_set()?;

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (commands, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let task = spawn_control(Arc::new(config), markers, rpc, events.clone(), command_rx);

        Ok(Self {
            commands,
            events,
            task,
        })
    }

    /// Receive every event emitted from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.events.subscribe()
    }

    /// Sanitize and launch the node.
    ///
    /// Returns once the process is spawned, or once the launch was
    /// postponed because of a database lock (an `Info` event says so).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Lifecycle` if the node is not stopped,
    /// `AppError::Config` if the binary is missing, and `AppError::Io` or
    /// `AppError::Process` if the data directory or process cannot be
    /// created.
    pub async fn start(&self) -> Result<()> {
        self.request(Command::Start).await?
    }

    /// Stop the node: ask it to exit, then force it after the grace
    /// period. Returns after `Stopped` was emitted. On a stopped node this
    /// only cancels a postponed start.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Lifecycle` if the supervisor task is gone.
    pub async fn stop(&self) -> Result<()> {
        self.request(Command::Stop).await?
    }

    /// Write one console command to the node.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Lifecycle` if no node is running and
    /// `AppError::Process` if its console is closed or its command queue
    /// is full.
    pub async fn write(&self, command: &str) -> Result<()> {
        let command = command.to_owned();
        self.request(|reply| Command::Write { command, reply })
            .await?
    }

    /// Current lifecycle state.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Lifecycle` if the supervisor task is gone.
    pub async fn state(&self) -> Result<LifecycleState> {
        self.request(Command::State).await
    }

    /// Stop the node if it runs and end the control task.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Lifecycle` if the control task is gone or
    /// panicked.
    pub async fn shutdown(self) -> Result<()> {
        self.request(Command::Shutdown).await?;
        self.task
            .await
            .map_err(|err| AppError::Lifecycle(format!("supervisor task failed: {err}")))
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| AppError::Lifecycle("supervisor task is gone".into()))?;
        response
            .await
            .map_err(|_| AppError::Lifecycle("supervisor task dropped the request".into()))
    }
}
