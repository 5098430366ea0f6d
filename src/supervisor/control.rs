//! Supervisor control task.
//!
//! One task owns every piece of mutable supervisor state: lifecycle, the
//! process handle, the debouncer, the health interval and all timers.
//! Commands, console events, timer expiries and results of spawned
//! helper tasks are handled one at a time in a single `select!` loop.
//!
//! Helper tasks (sync corroboration, health cycles) report back tagged
//! with the epoch they were started in. Every start, stop and process
//! exit bumps the epoch, so a result that arrives after its process is
//! gone is discarded instead of acting on the next one.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::NodeConfig;
use crate::health::cycle::{run_cycle, CycleOutcome, CycleSettings, HealthFailure, Probe};
use crate::health::debounce::LivenessDebouncer;
use crate::health::rpc::{NodeInfo, NodeRpc};
use crate::node::args::build_args;
use crate::node::classifier::{MarkerSet, OutputSignal};
use crate::node::process::{spawn_node, NodeProcess, ProcessEvent, TERM_GRACE};
use crate::supervisor::sanitation::{sanitize, SanitationOutcome};
use crate::supervisor::state::{LifecycleState, SupervisorEvent};
use crate::{AppError, Result};

/// Console command asking the node to shut down cleanly.
pub const EXIT_COMMAND: &str = "exit";

/// How long to wait for the process after forceful termination was
/// requested.
const KILL_WAIT: Duration = TERM_GRACE.saturating_add(Duration::from_secs(1));

/// Buffer size of the helper-task result channel.
const RESULT_BUFFER: usize = 16;

/// Requests from [`Supervisor`](super::Supervisor) handles.
#[derive(Debug)]
pub(crate) enum Command {
    Start(oneshot::Sender<Result<()>>),
    Stop(oneshot::Sender<Result<()>>),
    Write {
        command: String,
        reply: oneshot::Sender<Result<()>>,
    },
    State(oneshot::Sender<LifecycleState>),
    Shutdown(oneshot::Sender<()>),
}

/// Results of helper tasks spawned by the control task.
#[derive(Debug)]
enum TaskResult {
    Corroboration {
        epoch: u64,
        result: Result<NodeInfo>,
    },
    Cycle {
        epoch: u64,
        outcome: CycleOutcome,
    },
}

/// Mutable supervisor state, owned by the control task.
struct ControlState {
    lifecycle: LifecycleState,
    epoch: u64,
    process: Option<NodeProcess>,
    liveness: LivenessDebouncer,
    monitor: Option<Interval>,
    cycle_in_flight: bool,
    probe_echo: Option<oneshot::Sender<()>>,
    corroborating: bool,
    recheck_at: Option<Instant>,
    pending_start: Option<Instant>,
}

struct Control {
    config: Arc<NodeConfig>,
    markers: MarkerSet,
    rpc: Arc<dyn NodeRpc>,
    events: broadcast::Sender<SupervisorEvent>,
    results_tx: mpsc::Sender<TaskResult>,
    state: ControlState,
}

/// Spawn the control task.
pub(crate) fn spawn_control(
    config: Arc<NodeConfig>,
    markers: MarkerSet,
    rpc: Arc<dyn NodeRpc>,
    events: broadcast::Sender<SupervisorEvent>,
    commands: mpsc::Receiver<Command>,
) -> JoinHandle<()> {
    let (results_tx, results_rx) = mpsc::channel(RESULT_BUFFER);
    let window = config.health.down_window();
    let control = Control {
        config,
        markers,
        rpc,
        events,
        results_tx,
        state: ControlState {
            lifecycle: LifecycleState::Stopped,
            epoch: 0,
            process: None,
            liveness: LivenessDebouncer::new(window),
            monitor: None,
            cycle_in_flight: false,
            probe_echo: None,
            corroborating: false,
            recheck_at: None,
            pending_start: None,
        },
    };
    tokio::spawn(
        control
            .run(commands, results_rx)
            .instrument(info_span!("supervisor")),
    )
}

impl Control {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut results: mpsc::Receiver<TaskResult>,
    ) {
        let mut console: Option<mpsc::Receiver<ProcessEvent>> = None;

        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else {
                        debug!("all supervisor handles dropped");
                        if self.state.process.is_some() {
                            self.stop_node(&mut console).await;
                        }
                        break;
                    };
                    if self.handle_command(command, &mut console).await.is_break() {
                        break;
                    }
                }
                event = next_console_event(&mut console) => match event {
                    Some(event) => self.handle_process_event(event, &mut console),
                    None => {
                        console = None;
                        if self.state.process.is_some() {
                            self.on_unexpected_exit(None, &mut console);
                        }
                    }
                },
                Some(result) = results.recv() => self.handle_task_result(result),
                () = next_tick(&mut self.state.monitor) => self.on_tick(),
                () = sleep_until_opt(self.state.liveness.deadline()) => self.on_down_deadline(),
                () = sleep_until_opt(self.state.recheck_at) => self.on_recheck(),
                () = sleep_until_opt(self.state.pending_start) => {
                    self.state.pending_start = None;
                    if self.state.lifecycle == LifecycleState::Stopped {
                        info!("retrying postponed start");
                        let _ = self.begin_start(&mut console);
                    }
                }
            }
        }

        info!("supervisor control task exiting");
    }

    // ── Commands ────────────────────────────────────────

    async fn handle_command(
        &mut self,
        command: Command,
        console: &mut Option<mpsc::Receiver<ProcessEvent>>,
    ) -> ControlFlow<()> {
        match command {
            Command::Start(reply) => {
                let result = if self.state.lifecycle == LifecycleState::Stopped {
                    self.begin_start(console)
                } else {
                    Err(AppError::Lifecycle(format!(
                        "cannot start while {}",
                        self.state.lifecycle
                    )))
                };
                let _ = reply.send(result);
            }
            Command::Stop(reply) => {
                if self.state.lifecycle == LifecycleState::Stopped {
                    if self.state.pending_start.take().is_some() {
                        info!("cancelled postponed start");
                    }
                } else {
                    self.stop_node(console).await;
                }
                let _ = reply.send(Ok(()));
            }
            Command::Write { command, reply } => {
                let result = match &self.state.process {
                    Some(process) => process.try_send_command(&command),
                    None => Err(AppError::Lifecycle("node is not running".into())),
                };
                let _ = reply.send(result);
            }
            Command::State(reply) => {
                let _ = reply.send(self.state.lifecycle);
            }
            Command::Shutdown(reply) => {
                self.state.pending_start = None;
                if self.state.process.is_some() {
                    self.stop_node(console).await;
                }
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    /// Sanitize, then spawn. The lifecycle only leaves `Stopped` once a
    /// process exists.
    fn begin_start(&mut self, console: &mut Option<mpsc::Receiver<ProcessEvent>>) -> Result<()> {
        self.state.pending_start = None;

        let notices = match sanitize(&self.config) {
            Ok(SanitationOutcome::Proceed { notices }) => notices,
            Ok(SanitationOutcome::Retry { delay, notice }) => {
                info!(?delay, "start postponed");
                self.emit(SupervisorEvent::Info(notice));
                self.state.pending_start = Some(Instant::now() + delay);
                return Ok(());
            }
            Err(err) => {
                error!(%err, "start aborted");
                self.emit(SupervisorEvent::Error(err.clone()));
                return Err(err);
            }
        };
        for notice in notices {
            self.emit(SupervisorEvent::Info(notice));
        }

        let args = build_args(&self.config);
        let (process, events) =
            match spawn_node(&self.config.binary_path, &args, &self.config.data_dir) {
                Ok(spawned) => spawned,
                Err(err) => {
                    error!(%err, "start aborted");
                    self.emit(SupervisorEvent::Error(err.clone()));
                    return Err(err);
                }
            };

        self.cancel_monitoring();
        self.state.process = Some(process);
        *console = Some(events);
        self.set_lifecycle(LifecycleState::Starting);
        self.emit(SupervisorEvent::Start { args });
        Ok(())
    }

    /// Cancel monitoring, ask the node to exit, and force it after the
    /// grace period.
    async fn stop_node(&mut self, console: &mut Option<mpsc::Receiver<ProcessEvent>>) {
        self.cancel_monitoring();

        let Some(mut process) = self.state.process.take() else {
            *console = None;
            self.set_lifecycle(LifecycleState::Stopped);
            return;
        };
        let mut events = console.take();

        info!(pid = ?process.pid(), "stopping node");
        let grace = self.config.health.shutdown_grace();
        let deadline = Instant::now() + grace;
        match tokio::time::timeout_at(deadline, process.send_command(EXIT_COMMAND)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => debug!(%err, "exit command not delivered"),
            Err(_) => debug!("exit command not queued before the grace period ended"),
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        let mut exit = self.drain_until_exit(&mut events, remaining).await;
        if exit.is_none() {
            warn!(?grace, "node did not exit in time, forcing termination");
            process.force_terminate();
            exit = self.drain_until_exit(&mut events, KILL_WAIT).await;
            if exit.is_none() {
                warn!("node exit not observed after forced termination");
            }
        }
        drop(process);

        let exit_code = exit.flatten();
        self.set_lifecycle(LifecycleState::Stopped);
        self.emit(SupervisorEvent::Stopped { exit_code });
    }

    /// Forward console lines until the process exits or `limit` elapses.
    ///
    /// Returns `Some(exit_code)` once the exit was observed, `None` on
    /// timeout.
    async fn drain_until_exit(
        &self,
        events: &mut Option<mpsc::Receiver<ProcessEvent>>,
        limit: Duration,
    ) -> Option<Option<i32>> {
        let Some(events) = events.as_mut() else {
            return Some(None);
        };
        let deadline = Instant::now() + limit;
        loop {
            match tokio::time::timeout_at(deadline, events.recv()).await {
                Err(_) => return None,
                Ok(None) => return Some(None),
                Ok(Some(ProcessEvent::Exited { code })) => return Some(code),
                Ok(Some(ProcessEvent::Line(line))) => self.emit(SupervisorEvent::Data(line)),
                Ok(Some(ProcessEvent::ChannelError(message))) => {
                    debug!(%message, "channel error while stopping");
                }
            }
        }
    }

    /// Drop every timer and in-flight helper result. Runs before the
    /// process handle is torn down.
    fn cancel_monitoring(&mut self) {
        self.state.epoch = self.state.epoch.wrapping_add(1);
        self.state.monitor = None;
        self.state.cycle_in_flight = false;
        self.state.probe_echo = None;
        self.state.corroborating = false;
        self.state.recheck_at = None;
        self.state.liveness.reset();
    }

    // ── Process events ──────────────────────────────────

    fn handle_process_event(
        &mut self,
        event: ProcessEvent,
        console: &mut Option<mpsc::Receiver<ProcessEvent>>,
    ) {
        match event {
            ProcessEvent::Line(line) => self.on_console_line(line),
            ProcessEvent::ChannelError(message) => {
                warn!(%message, "node channel error");
                self.emit(SupervisorEvent::Error(AppError::Process(message.clone())));
                self.declare_down(format!("node channel error: {message}"));
            }
            ProcessEvent::Exited { code } => self.on_unexpected_exit(code, console),
        }
    }

    fn on_console_line(&mut self, line: String) {
        debug!(target: "node", "{line}");
        let signal = self.markers.classify(&line);
        self.emit(SupervisorEvent::Data(line));

        match signal {
            Some(OutputSignal::Started)
                if matches!(
                    self.state.lifecycle,
                    LifecycleState::Starting | LifecycleState::WaitingForSyncConfirmation
                ) =>
            {
                info!("node reports started");
                self.emit(SupervisorEvent::Started);
            }
            Some(OutputSignal::SyncClaimed) if self.state.lifecycle == LifecycleState::Starting => {
                self.begin_corroboration();
            }
            Some(OutputSignal::HelpEcho) => {
                if let Some(echo) = self.state.probe_echo.take() {
                    let _ = echo.send(());
                }
            }
            _ => {}
        }
    }

    fn on_unexpected_exit(
        &mut self,
        code: Option<i32>,
        console: &mut Option<mpsc::Receiver<ProcessEvent>>,
    ) {
        let reason = code.map_or_else(
            || "node terminated by signal".to_owned(),
            |c| format!("node exited unexpectedly with code {c}"),
        );
        warn!(?code, "node exited unexpectedly");

        let already_down = self.state.liveness.is_down();
        self.cancel_monitoring();
        self.state.process = None;
        *console = None;
        self.set_lifecycle(LifecycleState::Stopped);

        self.emit(SupervisorEvent::Error(AppError::Process(reason.clone())));
        if !already_down {
            self.emit(SupervisorEvent::Down { reason });
        }
        self.emit(SupervisorEvent::Stopped { exit_code: code });
    }

    /// Down that bypasses the debouncer.
    fn declare_down(&mut self, reason: String) {
        if self.state.liveness.mark_down() {
            warn!(%reason, "node declared down");
            self.emit(SupervisorEvent::Down { reason });
        }
    }

    // ── Sync corroboration ──────────────────────────────

    fn begin_corroboration(&mut self) {
        if self.state.corroborating {
            return;
        }
        self.state.corroborating = true;
        self.state.recheck_at = None;
        self.set_lifecycle(LifecycleState::WaitingForSyncConfirmation);

        let rpc = Arc::clone(&self.rpc);
        let results = self.results_tx.clone();
        let epoch = self.state.epoch;
        tokio::spawn(
            async move {
                let result = rpc.get_info().await;
                let _ = results
                    .send(TaskResult::Corroboration { epoch, result })
                    .await;
            }
            .instrument(info_span!("sync_corroboration", epoch)),
        );
    }

    fn on_corroboration(&mut self, result: Result<NodeInfo>) {
        self.state.corroborating = false;
        if self.state.lifecycle != LifecycleState::WaitingForSyncConfirmation {
            return;
        }

        match result {
            Ok(info) if info.height == info.network_height => {
                info!(height = info.height, "sync corroborated");
                self.set_lifecycle(LifecycleState::Synced);
                self.emit(SupervisorEvent::Synced);
                self.arm_monitor();
            }
            Ok(info) => {
                info!(
                    height = info.height,
                    network_height = info.network_height,
                    "sync claim not corroborated, rechecking"
                );
                self.schedule_recheck();
            }
            Err(err) => {
                warn!(%err, "sync corroboration query failed, rechecking");
                self.schedule_recheck();
            }
        }
    }

    fn schedule_recheck(&mut self) {
        self.set_lifecycle(LifecycleState::Starting);
        self.state.recheck_at = Some(Instant::now() + self.config.health.polling_interval());
    }

    fn on_recheck(&mut self) {
        self.state.recheck_at = None;
        if self.state.lifecycle == LifecycleState::Starting && self.state.process.is_some() {
            self.begin_corroboration();
        }
    }

    // ── Health monitoring ───────────────────────────────

    fn arm_monitor(&mut self) {
        let period = self.config.health.polling_interval();
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.state.monitor = Some(interval);
    }

    fn on_tick(&mut self) {
        if !self.state.lifecycle.is_monitored() {
            return;
        }
        if self.state.cycle_in_flight {
            debug!("previous health cycle still running, skipping tick");
            return;
        }
        let Some(commands) = self.state.process.as_ref().map(NodeProcess::command_sender) else {
            return;
        };

        let (echo_tx, echo_rx) = oneshot::channel();
        self.state.probe_echo = Some(echo_tx);
        self.state.cycle_in_flight = true;

        let probe = Probe::new(commands, echo_rx);
        let settings = CycleSettings::from(&self.config.health);
        let rpc = Arc::clone(&self.rpc);
        let results = self.results_tx.clone();
        let epoch = self.state.epoch;
        tokio::spawn(
            async move {
                let outcome = run_cycle(rpc.as_ref(), probe, settings).await;
                let _ = results.send(TaskResult::Cycle { epoch, outcome }).await;
            }
            .instrument(info_span!("health_cycle", epoch)),
        );
    }

    fn on_cycle(&mut self, outcome: CycleOutcome) {
        self.state.cycle_in_flight = false;
        self.state.probe_echo = None;
        if !self.state.lifecycle.is_monitored() {
            return;
        }

        if outcome.is_alive() {
            self.state.liveness.record_success();
        }

        match outcome {
            CycleOutcome::Ready(snapshot) => {
                self.set_lifecycle(LifecycleState::Monitoring);
                debug!(
                    height = snapshot.height,
                    network_height = snapshot.network_height,
                    hash_rate = snapshot.hash_rate,
                    "health cycle passed"
                );
                self.emit(SupervisorEvent::Ready(snapshot));
            }
            CycleOutcome::Desynced {
                snapshot,
                deviance,
                failure,
            } => {
                self.set_lifecycle(LifecycleState::Desynced);
                warn!(
                    height = snapshot.height,
                    network_height = snapshot.network_height,
                    deviance,
                    "node is out of sync"
                );
                self.emit(SupervisorEvent::Desync {
                    height: snapshot.height,
                    network_height: snapshot.network_height,
                    deviance,
                });
                if let Some(failure) = failure {
                    self.on_cycle_failure(failure);
                }
            }
            CycleOutcome::Failed(failure) => self.on_cycle_failure(failure),
        }
    }

    fn on_cycle_failure(&mut self, failure: HealthFailure) {
        let action = self.state.liveness.record_failure(Instant::now());
        warn!(
            %failure,
            failures = self.state.liveness.consecutive_failures(),
            ?action,
            "health cycle failed"
        );
        self.emit(SupervisorEvent::Error(failure.into()));
    }

    fn on_down_deadline(&mut self) {
        if !self.state.liveness.fire(Instant::now()) {
            return;
        }
        let failures = self.state.liveness.consecutive_failures();
        let window = self.config.health.down_window();
        let reason = format!(
            "node failed health checks for {}ms ({failures} consecutive failed cycles)",
            window.as_millis()
        );
        warn!(%reason, "node declared down");
        self.emit(SupervisorEvent::Down { reason });
    }

    // ── Helpers ─────────────────────────────────────────

    fn handle_task_result(&mut self, result: TaskResult) {
        match result {
            TaskResult::Corroboration { epoch, result } if epoch == self.state.epoch => {
                self.on_corroboration(result);
            }
            TaskResult::Cycle { epoch, outcome } if epoch == self.state.epoch => {
                self.on_cycle(outcome);
            }
            _ => debug!("discarding stale helper result"),
        }
    }

    fn set_lifecycle(&mut self, next: LifecycleState) {
        if self.state.lifecycle != next {
            debug!(from = %self.state.lifecycle, to = %next, "lifecycle transition");
            self.state.lifecycle = next;
        }
    }

    fn emit(&self, event: SupervisorEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

async fn next_console_event(
    console: &mut Option<mpsc::Receiver<ProcessEvent>>,
) -> Option<ProcessEvent> {
    match console {
        Some(console) => console.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
