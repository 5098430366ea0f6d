//! Node process handle.
//!
//! Spawns the node binary with piped stdio and runs three kinds of
//! background task per process:
//! - two console readers (stdout and stderr) feeding one ordered
//!   [`ProcessEvent`] stream,
//! - a control-channel writer that sends newline-terminated commands to
//!   the node's stdin,
//! - an exit monitor that owns the [`Child`], reports its exit, and
//!   performs forceful termination on request.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::node::codec::ConsoleCodec;
use crate::{AppError, Result};

/// Grace between the termination signal and an unconditional kill.
pub const TERM_GRACE: Duration = Duration::from_secs(2);

/// Upper bound on waiting for the console readers to drain after exit.
const READER_DRAIN: Duration = Duration::from_millis(500);

/// Buffer size of the per-process event channel.
const EVENT_BUFFER: usize = 256;

/// Buffer size of the control-channel command queue.
const COMMAND_BUFFER: usize = 16;

/// Something the supervised process did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// One trimmed console line from stdout or stderr.
    Line(String),
    /// Reading the console or writing the control channel failed.
    ChannelError(String),
    /// The process exited. `code` is `None` when it died from a signal.
    Exited {
        /// Process exit code, if any.
        code: Option<i32>,
    },
}

/// Live handle to one spawned node process.
///
/// Dropping the handle stops the console tasks and terminates the process.
#[derive(Debug)]
pub struct NodeProcess {
    pid: Option<u32>,
    commands: mpsc::Sender<String>,
    terminate: Option<oneshot::Sender<()>>,
    cancel: CancellationToken,
}

impl NodeProcess {
    /// OS process id, if the process was still running when spawned.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Queue a command for the node's control channel.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Process` if the writer task has stopped.
    pub async fn send_command(&self, command: &str) -> Result<()> {
        self.commands
            .send(command.to_owned())
            .await
            .map_err(|_| AppError::Process("control channel closed".into()))
    }

    /// Queue a command without waiting for room in the control channel.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Process` if the queue is full because the node
    /// stopped reading its console, or if the writer task has stopped.
    pub fn try_send_command(&self, command: &str) -> Result<()> {
        self.commands
            .try_send(command.to_owned())
            .map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => {
                    AppError::Process("control channel full".into())
                }
                mpsc::error::TrySendError::Closed(_) => {
                    AppError::Process("control channel closed".into())
                }
            })
    }

    /// Sender for the control channel, for tasks that outlive a borrow of
    /// the handle.
    #[must_use]
    pub fn command_sender(&self) -> mpsc::Sender<String> {
        self.commands.clone()
    }

    /// Ask the exit monitor to terminate the process. Idempotent.
    pub fn force_terminate(&mut self) {
        if let Some(terminate) = self.terminate.take() {
            let _ = terminate.send(());
        }
    }
}

impl Drop for NodeProcess {
    fn drop(&mut self) {
        self.force_terminate();
        self.cancel.cancel();
    }
}

/// Spawn the node binary and start its console tasks.
///
/// # Errors
///
/// Returns `AppError::Process` if the OS refuses to spawn the binary or
/// its stdio cannot be captured.
pub fn spawn_node(
    binary: &Path,
    args: &[String],
    working_dir: &Path,
) -> Result<(NodeProcess, mpsc::Receiver<ProcessEvent>)> {
    let mut child = Command::new(binary)
        .args(args)
        .current_dir(working_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| {
            AppError::Process(format!("failed to spawn {}: {err}", binary.display()))
        })?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Process("failed to capture node stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Process("failed to capture node stdout".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::Process("failed to capture node stderr".into()))?;

    let pid = child.id();
    info!(pid, binary = %binary.display(), "node process spawned");

    let cancel = CancellationToken::new();
    let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
    let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
    let (terminate_tx, terminate_rx) = oneshot::channel();

    let readers = vec![
        tokio::spawn(
            run_console_reader(stdout, event_tx.clone(), cancel.clone())
                .instrument(info_span!("console_reader", stream = "stdout")),
        ),
        tokio::spawn(
            run_console_reader(stderr, event_tx.clone(), cancel.clone())
                .instrument(info_span!("console_reader", stream = "stderr")),
        ),
    ];
    tokio::spawn(
        run_command_writer(stdin, command_rx, event_tx.clone(), cancel.clone())
            .instrument(info_span!("command_writer")),
    );
    tokio::spawn(
        monitor_exit(child, readers, terminate_rx, event_tx)
            .instrument(info_span!("exit_monitor", pid)),
    );

    Ok((
        NodeProcess {
            pid,
            commands: command_tx,
            terminate: Some(terminate_tx),
            cancel,
        },
        event_rx,
    ))
}

/// Read console lines until EOF, an I/O error, or cancellation.
async fn run_console_reader<R>(
    stream: R,
    event_tx: mpsc::Sender<ProcessEvent>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(stream, ConsoleCodec::new());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => break,

            item = framed.next() => match item {
                None => {
                    debug!("console reader: EOF");
                    break;
                }
                Some(Ok(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    if event_tx.send(ProcessEvent::Line(line.to_owned())).await.is_err() {
                        break;
                    }
                }
                Some(Err(err)) => {
                    warn!(%err, "console reader: read failed, stopping");
                    let _ = event_tx
                        .send(ProcessEvent::ChannelError(format!("console read failed: {err}")))
                        .await;
                    break;
                }
            },
        }
    }
}

/// Write queued commands to the node's stdin, one per line.
async fn run_command_writer(
    mut stdin: ChildStdin,
    mut command_rx: mpsc::Receiver<String>,
    event_tx: mpsc::Sender<ProcessEvent>,
    cancel: CancellationToken,
) {
    loop {
        let command = tokio::select! {
            biased;

            () = cancel.cancelled() => break,

            command = command_rx.recv() => match command {
                Some(command) => command,
                None => break,
            },
        };

        let mut bytes = command.into_bytes();
        bytes.push(b'\n');

        let written = match stdin.write_all(&bytes).await {
            Ok(()) => stdin.flush().await,
            Err(err) => Err(err),
        };
        if let Err(err) = written {
            warn!(%err, "command writer: write to stdin failed");
            let _ = event_tx
                .send(ProcessEvent::ChannelError(format!(
                    "control channel write failed: {err}"
                )))
                .await;
            break;
        }
    }
}

/// Await process exit, terminating it first if asked to.
///
/// `Exited` is sent only after the console readers drained (bounded by
/// [`READER_DRAIN`]), so the final console lines precede it.
async fn monitor_exit(
    mut child: Child,
    readers: Vec<JoinHandle<()>>,
    terminate_rx: oneshot::Receiver<()>,
    event_tx: mpsc::Sender<ProcessEvent>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = terminate_rx => {
            terminate(&mut child).await;
            child.wait().await
        }
    };

    let code = match status {
        Ok(status) => {
            let code = status.code();
            info!(?code, "node process exited");
            code
        }
        Err(err) => {
            warn!(%err, "error waiting for node process");
            None
        }
    };

    let _ = tokio::time::timeout(READER_DRAIN, async {
        for reader in readers {
            let _ = reader.await;
        }
    })
    .await;

    let _ = event_tx.send(ProcessEvent::Exited { code }).await;
}

/// Ask the process to terminate, then kill it if it outlives [`TERM_GRACE`].
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            match kill(Pid::from_raw(pid), Signal::SIGTERM) {
                Ok(()) => {
                    info!(pid, "sent SIGTERM to node");
                    if tokio::time::timeout(TERM_GRACE, child.wait()).await.is_ok() {
                        return;
                    }
                    warn!(pid, "node ignored SIGTERM, killing");
                }
                Err(err) => warn!(pid, %err, "failed to send SIGTERM to node"),
            }
        }
    }

    if let Err(err) = child.kill().await {
        warn!(%err, "failed to kill node process");
    }
}
