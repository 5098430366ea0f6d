#![forbid(unsafe_code)]

//! `node-warden`: keeps a blockchain node daemon running.
//!
//! Loads the configuration, launches the node under a [`Supervisor`], and
//! restarts it whenever the supervisor reports it down or stopped.

use std::path::PathBuf;

use chrono::Utc;
use clap::{Parser, ValueEnum};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use node_warden::node::args::build_args;
use node_warden::{AppError, NodeConfig, Result, Supervisor, SupervisorEvent};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "node-warden", about = "Blockchain node supervisor", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Print the launch plan as JSON and exit without starting the node.
    #[arg(long)]
    dry_run: bool,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let config = NodeConfig::load_from_path(&args.config)?;
    info!(
        binary = %config.binary_path.display(),
        data_dir = %config.data_dir.display(),
        "configuration loaded"
    );

    if args.dry_run {
        let plan = serde_json::json!({
            "binary": config.binary_path,
            "working_dir": config.data_dir,
            "args": build_args(&config),
            "rpc": config.rpc_base_url(),
        });
        println!("{plan:#}");
        return Ok(());
    }

    let supervisor = Supervisor::new(config)?;
    let mut events = supervisor.subscribe();
    supervisor.start().await?;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => handle_event(&supervisor, event).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event receiver lagged");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    supervisor.shutdown().await?;
    info!("node-warden shut down");
    Ok(())
}

/// Log one event and apply the restart policy: a node reported down is
/// stopped, and a stopped node is started again.
async fn handle_event(supervisor: &Supervisor, event: SupervisorEvent) {
    let at = Utc::now().to_rfc3339();
    match event {
        SupervisorEvent::Start { args } => info!(%at, args = %args.join(" "), "node launched"),
        SupervisorEvent::Started => info!(%at, "node started"),
        SupervisorEvent::Synced => info!(%at, "node synced"),
        SupervisorEvent::Ready(snapshot) => info!(
            %at,
            height = snapshot.height,
            network_height = snapshot.network_height,
            difficulty = snapshot.difficulty,
            hash_rate = snapshot.hash_rate,
            status = %snapshot.status,
            "node healthy"
        ),
        SupervisorEvent::Desync {
            height,
            network_height,
            deviance,
        } => warn!(%at, height, network_height, deviance, "node out of sync"),
        SupervisorEvent::Info(message) => info!(%at, "{message}"),
        SupervisorEvent::Error(err) => warn!(%at, %err, "node error"),
        SupervisorEvent::Data(_) => {}
        SupervisorEvent::Down { reason } => {
            warn!(%at, %reason, "node down, restarting");
            if let Err(err) = supervisor.stop().await {
                error!(%err, "failed to stop node");
            }
        }
        SupervisorEvent::Stopped { exit_code } => {
            info!(%at, ?exit_code, "node stopped, starting again");
            if let Err(err) = supervisor.start().await {
                error!(%err, "failed to restart node");
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
