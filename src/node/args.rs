//! Command-line flags for the node binary.

use std::path::Path;

use crate::config::NodeConfig;

/// Build the node's argument vector from configuration.
///
/// Every option maps to exactly one flag; unset options emit nothing and
/// list options repeat their flag once per entry. Values are separate argv
/// elements, so paths containing spaces survive intact.
#[must_use]
pub fn build_args(config: &NodeConfig) -> Vec<String> {
    let mut args = Vec::new();

    push_path(&mut args, "--data-dir", &config.data_dir);
    if config.testnet {
        args.push("--testnet".to_owned());
    }
    if let Some(origin) = &config.rpc.enable_cors {
        push_value(&mut args, "--enable-cors", origin);
    }
    if config.rpc.enable_block_explorer {
        args.push("--enable_blockexplorer".to_owned());
    }
    if let Some(checkpoints) = &config.load_checkpoints {
        push_path(&mut args, "--load-checkpoints", checkpoints);
    }

    push_value(&mut args, "--rpc-bind-ip", &config.rpc.bind_ip);
    push_value(&mut args, "--rpc-bind-port", config.rpc.bind_port);

    let p2p = &config.p2p;
    if let Some(ip) = &p2p.bind_ip {
        push_value(&mut args, "--p2p-bind-ip", ip);
    }
    if let Some(port) = p2p.bind_port {
        push_value(&mut args, "--p2p-bind-port", port);
    }
    if let Some(port) = p2p.external_port {
        push_value(&mut args, "--p2p-external-port", port);
    }
    if p2p.allow_local_ip {
        args.push("--allow-local-ip".to_owned());
    }
    for peer in &p2p.peers {
        push_value(&mut args, "--add-peer", peer);
    }
    for peer in &p2p.priority_nodes {
        push_value(&mut args, "--add-priority-node", peer);
    }
    for peer in &p2p.exclusive_nodes {
        push_value(&mut args, "--add-exclusive-node", peer);
    }
    for seed in &p2p.seed_nodes {
        push_value(&mut args, "--seed-node", seed);
    }
    if p2p.hide_my_port {
        args.push("--hide-my-port".to_owned());
    }

    let db = &config.database;
    if let Some(threads) = db.threads {
        push_value(&mut args, "--db-threads", threads);
    }
    if let Some(files) = db.max_open_files {
        push_value(&mut args, "--db-max-open-files", files);
    }
    if let Some(size) = db.write_buffer_size {
        push_value(&mut args, "--db-write-buffer-size", size);
    }
    if let Some(size) = db.read_cache_size {
        push_value(&mut args, "--db-read-cache-size", size);
    }

    args
}

fn push_value(args: &mut Vec<String>, flag: &str, value: impl ToString) {
    args.push(flag.to_owned());
    args.push(value.to_string());
}

fn push_path(args: &mut Vec<String>, flag: &str, path: &Path) {
    args.push(flag.to_owned());
    args.push(path.to_string_lossy().into_owned());
}
