use node_warden::config::MarkerConfig;
use node_warden::node::classifier::{MarkerSet, OutputSignal};
use node_warden::AppError;

fn markers() -> MarkerSet {
    MarkerSet::defaults().expect("default markers compile")
}

#[test]
fn recognises_start_confirmation() {
    let set = markers();
    assert_eq!(
        set.classify("2019-Jan-01 12:00:00.000 INFO  P2p server initialized OK"),
        None
    );
    assert_eq!(
        set.classify("INFO  P2P initialized"),
        Some(OutputSignal::Started)
    );
    assert_eq!(
        set.classify("Always exit TurtleCoind and Simplewallet with \"exit\" command"),
        Some(OutputSignal::Started)
    );
}

#[test]
fn recognises_sync_claims() {
    let set = markers();
    for line in [
        "SUCCESSFULLY SYNCHRONIZED WITH THE TURTLECOIN NETWORK",
        "You are now synchronized with the network.",
        "Successfully synchronized with the TurtleCoin network.",
        "SYNCHRONIZED OK",
    ] {
        assert_eq!(set.classify(line), Some(OutputSignal::SyncClaimed), "{line}");
    }
}

#[test]
fn recognises_help_banner() {
    assert_eq!(
        markers().classify("help              Show this help"),
        Some(OutputSignal::HelpEcho)
    );
}

#[test]
fn ordinary_lines_are_unclassified() {
    let set = markers();
    assert_eq!(set.classify("Block 120000 added to main chain"), None);
    assert_eq!(set.classify(""), None);
    assert_eq!(set.classify("    "), None);
}

#[test]
fn surrounding_whitespace_is_ignored() {
    assert_eq!(
        markers().classify("   SYNCHRONIZED OK\r"),
        Some(OutputSignal::SyncClaimed)
    );
}

#[test]
fn sync_claim_wins_over_start_marker() {
    assert_eq!(
        markers().classify("P2P initialized; SYNCHRONIZED OK"),
        Some(OutputSignal::SyncClaimed)
    );
}

#[test]
fn override_replaces_only_its_marker() {
    let config = MarkerConfig {
        synced: vec!["^node ready$".into()],
        ..MarkerConfig::default()
    };
    let set = MarkerSet::from_config(&config).expect("compile");

    assert_eq!(set.classify("node ready"), Some(OutputSignal::SyncClaimed));
    assert_eq!(set.classify("SYNCHRONIZED OK"), None);
    assert_eq!(set.classify("P2P initialized"), Some(OutputSignal::Started));
}

#[test]
fn invalid_override_names_the_marker() {
    let config = MarkerConfig {
        started: vec!["[".into()],
        ..MarkerConfig::default()
    };
    let err = MarkerSet::from_config(&config).expect_err("must fail");
    match err {
        AppError::Config(msg) => assert!(msg.contains("started marker"), "{msg}"),
        other => panic!("unexpected: {other}"),
    }
}
