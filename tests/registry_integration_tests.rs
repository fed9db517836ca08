//! End-to-end tests driving the `monerosim-registry` binary as independent processes.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;

use monerosim_registry::discovery::{AgentDiscovery, CacheTtls};
use monerosim_registry::registry::{NodeStatus, Registration, RegistrationWriter};
use monerosim_registry::store::{LockGuard, LockPolicy, RegistryStore};

fn registry_cmd(shared_dir: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_monerosim-registry"));
    cmd.arg("--shared-dir").arg(shared_dir).env("RUST_LOG", "warn");
    cmd
}

fn run_ok(cmd: &mut Command) -> Value {
    let output = cmd.output().expect("failed to run monerosim-registry");
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("stdout is not JSON")
}

fn sorted_ids(discovery: &mut AgentDiscovery) -> Vec<String> {
    let mut ids: Vec<String> = discovery
        .get_registry(true)
        .unwrap()
        .agents
        .iter()
        .map(|a| a.id.clone())
        .collect();
    ids.sort();
    ids
}

#[test]
fn test_concurrent_processes_register_exactly_once() {
    let dir = TempDir::new().unwrap();

    let children: Vec<_> = ["m1", "m2", "m3"]
        .iter()
        .map(|id| {
            registry_cmd(dir.path())
                .args(["register", *id, "--type", "miner", "--attr", "is_miner=true"])
                .spawn()
                .expect("failed to spawn monerosim-registry")
        })
        .collect();
    for child in children {
        let output: Output = child.wait_with_output().unwrap();
        assert!(output.status.success());
    }

    let mut discovery = AgentDiscovery::new(dir.path()).unwrap();
    assert_eq!(sorted_ids(&mut discovery), vec!["m1", "m2", "m3"]);

    // A second round of the same registrations changes nothing
    let children: Vec<_> = ["m1", "m2", "m3"]
        .iter()
        .map(|id| {
            registry_cmd(dir.path())
                .args(["register", *id, "--type", "miner"])
                .spawn()
                .unwrap()
        })
        .collect();
    for child in children {
        assert!(child.wait_with_output().unwrap().status.success());
    }
    assert_eq!(sorted_ids(&mut discovery), vec!["m1", "m2", "m3"]);
    assert_eq!(discovery.get_miners(true).unwrap().len(), 3);

    let leftovers: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty(), "temporary files left behind: {:?}", leftovers);
}

#[test]
fn test_lock_timeout_names_live_holder() {
    let dir = TempDir::new().unwrap();
    let store = RegistryStore::open(dir.path()).unwrap();
    let guard = LockGuard::acquire(&store.lock_path("agent_registry.json"), &LockPolicy::default()).unwrap();

    let output = registry_cmd(dir.path())
        .args(["--lock-timeout", "0.3", "register", "user000"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains(&format!("held by live process {}", std::process::id())),
        "unexpected stderr: {}",
        stderr
    );

    drop(guard);
    run_ok(registry_cmd(dir.path()).args(["--lock-timeout", "5", "register", "user000"]));
}

#[test]
fn test_generator_files_public_node_flow() {
    let dir = TempDir::new().unwrap();

    // Files as laid down by the config generator before agents start
    fs::write(
        dir.path().join("agent_registry.json"),
        serde_json::to_vec_pretty(&json!({"agents": [
            {"id": "user000", "ip_addr": "10.0.0.10", "daemon": true, "wallet": true,
             "daemon_rpc_port": 28081, "wallet_rpc_port": 28082,
             "attributes": {"is_miner": "true", "hashrate": "60"}},
            {"id": "user001", "ip_addr": "10.0.0.11", "daemon": true, "wallet": true,
             "daemon_rpc_port": 28081, "wallet_rpc_port": 28082,
             "attributes": {"is_public_node": "true"}},
            {"id": "user002", "ip_addr": "10.0.0.12", "daemon": true, "wallet": false,
             "daemon_rpc_port": 28081,
             "attributes": {"is_public_node": "true"}},
            {"id": "user003", "ip_addr": "10.0.0.13", "daemon": false, "wallet": true,
             "wallet_rpc_port": 28082,
             "attributes": {"can_receive_distributions": "true"}}
        ]}))
        .unwrap(),
    )
    .unwrap();
    fs::write(
        dir.path().join("miners.json"),
        r#"{"miners": [{"agent_id": "user000", "ip_addr": "10.0.0.10", "weight": 60}]}"#,
    )
    .unwrap();

    // The wallet agent comes up and records its address
    let store = RegistryStore::open(dir.path()).unwrap();
    let writer = RegistrationWriter::new(store.clone());
    writer.record_wallet_address("user003", "4AdUndXHHZ6cfufTMvppY6JwXNouMBzSkbLYfpAV5Usx").unwrap();
    assert!(writer.register_or_degrade(&Registration::new("user003").agent_type("user")));

    let seeded = run_ok(registry_cmd(dir.path()).arg("seed-public-nodes"));
    assert_eq!(seeded, json!({"seeded": 2}));

    let picks = run_ok(registry_cmd(dir.path()).args([
        "select", "--strategy", "round_robin", "--count", "3", "--exclude", "user000",
    ]));
    assert_eq!(
        picks,
        json!(["10.0.0.11:28081", "10.0.0.12:28081", "10.0.0.11:28081"])
    );

    run_ok(registry_cmd(dir.path()).args(["set-status", "user001", "busy"]));
    let available = run_ok(registry_cmd(dir.path()).args(["public-nodes", "--status", "available"]));
    assert_eq!(available.as_array().unwrap().len(), 1);
    assert_eq!(available[0]["agent_id"], json!("user002"));

    let missing = registry_cmd(dir.path()).args(["set-status", "user404", "busy"]).output().unwrap();
    assert!(!missing.status.success());

    let mut discovery = AgentDiscovery::with_ttls(dir.path(), CacheTtls::uniform(Duration::from_secs(60))).unwrap();
    let recipients = discovery.get_distribution_recipients(false).unwrap();
    assert_eq!(recipients.len(), 1);
    assert_eq!(recipients[0].id, "user003");
    assert_eq!(
        recipients[0].wallet_address.as_deref(),
        Some("4AdUndXHHZ6cfufTMvppY6JwXNouMBzSkbLYfpAV5Usx")
    );

    let miners = discovery.get_miners(false).unwrap();
    assert_eq!(miners.len(), 1);
    assert_eq!(miners[0].daemon_address().as_deref(), Some("10.0.0.10:28081"));

    let nodes = discovery.get_public_nodes(Some(NodeStatus::Busy), false).unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].agent_id, "user001");
    assert!(nodes[0].registered_at > 0.0);

    let stats = run_ok(registry_cmd(dir.path()).arg("stats"));
    assert_eq!(stats["total_agents"], json!(4));
    assert_eq!(stats["total_miners"], json!(1));
    assert!(stats["last_updated_rfc3339"].is_string());
}
