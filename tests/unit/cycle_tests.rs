//! Unit tests for health-cycle evaluation, the liveness probe, and the
//! derived metrics.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use node_warden::health::cycle::{
    deviance, evaluate, hash_rate, run_cycle, CycleOutcome, CycleSettings, HealthFailure, Probe,
    PROBE_COMMAND,
};
use node_warden::health::rpc::{HeightReport, NodeInfo, NodeRpc, RpcFuture, TransactionsReport};
use node_warden::{AppError, Result};

const SETTINGS: CycleSettings = CycleSettings {
    check_height: true,
    max_deviance: 5,
};

fn info(height: u64, network_height: u64) -> NodeInfo {
    NodeInfo {
        height,
        difficulty: 3000,
        status: "OK".into(),
        network_height,
    }
}

fn height(height: u64) -> HeightReport {
    HeightReport {
        height,
        status: "OK".into(),
    }
}

fn transactions() -> TransactionsReport {
    TransactionsReport {
        status: "OK".into(),
    }
}

fn judge(info_result: Result<NodeInfo>, height_result: Result<HeightReport>) -> CycleOutcome {
    evaluate(info_result, height_result, Ok(transactions()), Ok(()), SETTINGS)
}

#[test]
fn hash_rate_divides_difficulty_by_block_target() {
    assert_eq!(hash_rate(3000), 100);
    assert_eq!(hash_rate(0), 0);
    assert_eq!(hash_rate(44), 1);
    assert_eq!(hash_rate(45), 2);
}

#[test]
fn deviance_is_symmetric() {
    assert_eq!(deviance(100, 106), 6);
    assert_eq!(deviance(106, 100), 6);
    assert_eq!(deviance(7, 7), 0);
}

#[test]
fn consistent_answers_are_ready() {
    match judge(Ok(info(100, 100)), Ok(height(100))) {
        CycleOutcome::Ready(snapshot) => {
            assert_eq!(snapshot.height, 100);
            assert_eq!(snapshot.network_height, 100);
            assert_eq!(snapshot.hash_rate, 100);
            assert_eq!(snapshot.status, "OK");
        }
        other => panic!("expected ready, got {other:?}"),
    }
}

#[test]
fn deviance_at_threshold_is_ready() {
    assert!(matches!(
        judge(Ok(info(100, 105)), Ok(height(100))),
        CycleOutcome::Ready(_)
    ));
}

#[test]
fn deviance_above_threshold_is_desync() {
    match judge(Ok(info(100, 106)), Ok(height(100))) {
        CycleOutcome::Desynced {
            snapshot,
            deviance,
            failure,
        } => {
            assert_eq!(deviance, 6);
            assert_eq!(snapshot.network_height, 106);
            assert_eq!(failure, None);
        }
        other => panic!("expected desync, got {other:?}"),
    }
}

#[test]
fn height_check_can_be_disabled() {
    let settings = CycleSettings {
        check_height: false,
        max_deviance: 5,
    };
    let outcome = evaluate(
        Ok(info(100, 500)),
        Ok(height(100)),
        Ok(transactions()),
        Ok(()),
        settings,
    );
    assert!(matches!(outcome, CycleOutcome::Ready(_)));
}

#[test]
fn height_mismatch_is_inconsistent() {
    assert_eq!(
        judge(Ok(info(100, 100)), Ok(height(99))),
        CycleOutcome::Failed(HealthFailure::Inconsistent)
    );
}

#[test]
fn status_mismatch_is_inconsistent() {
    let outcome = evaluate(
        Ok(info(100, 100)),
        Ok(height(100)),
        Ok(TransactionsReport {
            status: "BUSY".into(),
        }),
        Ok(()),
        SETTINGS,
    );
    assert_eq!(outcome, CycleOutcome::Failed(HealthFailure::Inconsistent));
}

#[test]
fn desync_wins_over_inconsistency() {
    assert!(matches!(
        judge(Ok(info(100, 200)), Ok(height(98))),
        CycleOutcome::Desynced {
            deviance: 100,
            failure: None,
            ..
        }
    ));
}

#[test]
fn desync_is_reported_when_console_is_unresponsive() {
    let outcome = evaluate(
        Ok(info(100, 200)),
        Ok(height(100)),
        Ok(transactions()),
        Err(HealthFailure::ProbeTimeout),
        SETTINGS,
    );
    match outcome {
        CycleOutcome::Desynced {
            ref snapshot,
            deviance,
            ref failure,
        } => {
            assert_eq!(deviance, 100);
            assert_eq!(snapshot.height, 100);
            assert_eq!(failure, &Some(HealthFailure::ProbeTimeout));
        }
        ref other => panic!("expected desync, got {other:?}"),
    }
    assert!(!outcome.is_alive());
}

#[test]
fn query_failure_is_unreachable_and_names_the_query() {
    let outcome = judge(
        Ok(info(100, 100)),
        Err(AppError::Rpc("could not get /getheight: refused".into())),
    );
    match outcome {
        CycleOutcome::Failed(HealthFailure::Unreachable(reason)) => {
            assert!(reason.contains("/getheight"), "{reason}");
        }
        other => panic!("expected unreachable, got {other:?}"),
    }
}

#[test]
fn query_failure_wins_over_probe_timeout() {
    let outcome = evaluate(
        Err(AppError::Rpc("could not get /getinfo".into())),
        Ok(height(100)),
        Ok(transactions()),
        Err(HealthFailure::ProbeTimeout),
        SETTINGS,
    );
    assert!(matches!(
        outcome,
        CycleOutcome::Failed(HealthFailure::Unreachable(_))
    ));
}

#[test]
fn probe_timeout_fails_even_with_good_answers() {
    let outcome = evaluate(
        Ok(info(100, 100)),
        Ok(height(100)),
        Ok(transactions()),
        Err(HealthFailure::ProbeTimeout),
        SETTINGS,
    );
    assert_eq!(outcome, CycleOutcome::Failed(HealthFailure::ProbeTimeout));
}

#[test]
fn desynced_counts_as_alive() {
    let desynced = judge(Ok(info(100, 200)), Ok(height(100)));
    assert!(desynced.is_alive());
    assert!(judge(Ok(info(100, 100)), Ok(height(100))).is_alive());
    assert!(!CycleOutcome::Failed(HealthFailure::Inconsistent).is_alive());
}

// ── Probe ───────────────────────────────────────────

#[tokio::test]
async fn probe_succeeds_when_echo_arrives() {
    let (commands_tx, mut commands_rx) = mpsc::channel(4);
    let (echo_tx, echo_rx) = oneshot::channel();

    let console = tokio::spawn(async move {
        let command = commands_rx.recv().await.expect("probe command");
        assert_eq!(command, PROBE_COMMAND);
        echo_tx.send(()).expect("probe waiting");
    });

    Probe::new(commands_tx, echo_rx).run().await.expect("probe");
    console.await.expect("console task");
}

#[tokio::test(start_paused = true)]
async fn probe_times_out_without_echo() {
    let (commands_tx, _commands_rx) = mpsc::channel(4);
    let (_echo_tx, echo_rx) = oneshot::channel();

    let result = Probe::new(commands_tx, echo_rx)
        .with_timeout(Duration::from_millis(50))
        .run()
        .await;
    assert_eq!(result, Err(HealthFailure::ProbeTimeout));
}

#[tokio::test(start_paused = true)]
async fn probe_gives_up_when_command_queue_stays_full() {
    let (commands_tx, _commands_rx) = mpsc::channel(1);
    commands_tx
        .try_send("status".to_owned())
        .expect("fill the queue");
    let (_echo_tx, echo_rx) = oneshot::channel();

    let probe = Probe::new(commands_tx, echo_rx).with_timeout(Duration::from_millis(100));
    let result = tokio::time::timeout(Duration::from_secs(2), probe.run())
        .await
        .expect("probe bounded by its own timeout");
    assert_eq!(result, Err(HealthFailure::ProbeTimeout));
}

#[tokio::test]
async fn probe_fails_when_control_channel_is_closed() {
    let (commands_tx, commands_rx) = mpsc::channel(4);
    drop(commands_rx);
    let (_echo_tx, echo_rx) = oneshot::channel();

    let result = Probe::new(commands_tx, echo_rx).run().await;
    assert_eq!(result, Err(HealthFailure::ProbeTimeout));
}

// ── Full cycle against a fake node ──────────────────

struct StaticRpc {
    info: Result<NodeInfo>,
    height: Result<HeightReport>,
}

impl NodeRpc for StaticRpc {
    fn get_info(&self) -> RpcFuture<'_, NodeInfo> {
        let result = self.info.clone();
        Box::pin(async move { result })
    }

    fn get_height(&self) -> RpcFuture<'_, HeightReport> {
        let result = self.height.clone();
        Box::pin(async move { result })
    }

    fn get_transactions(&self) -> RpcFuture<'_, TransactionsReport> {
        Box::pin(async { Ok(transactions()) })
    }
}

fn answered_probe() -> Probe {
    let (commands_tx, mut commands_rx) = mpsc::channel(4);
    let (echo_tx, echo_rx) = oneshot::channel();
    tokio::spawn(async move {
        if commands_rx.recv().await.is_some() {
            let _ = echo_tx.send(());
        }
    });
    Probe::new(commands_tx, echo_rx)
}

#[tokio::test]
async fn run_cycle_reports_ready() {
    let rpc = StaticRpc {
        info: Ok(info(5000, 5002)),
        height: Ok(height(5000)),
    };
    let outcome = run_cycle(&rpc, answered_probe(), SETTINGS).await;
    assert!(matches!(outcome, CycleOutcome::Ready(ref s) if s.height == 5000));
}

#[tokio::test]
async fn run_cycle_reports_unreachable_node() {
    let rpc = StaticRpc {
        info: Err(AppError::Rpc("could not get /getinfo: connection refused".into())),
        height: Err(AppError::Rpc("could not get /getheight: connection refused".into())),
    };
    let outcome = run_cycle(&rpc, answered_probe(), SETTINGS).await;
    match outcome {
        CycleOutcome::Failed(HealthFailure::Unreachable(reason)) => {
            assert!(reason.contains("/getinfo"));
            assert!(reason.contains("/getheight"));
        }
        other => panic!("expected unreachable, got {other:?}"),
    }
}
