//! Public node status maintenance in `public_nodes.json`.

use log::{debug, error, info, warn};
use serde_json::{json, Value};

use crate::registry::{
    unix_now, AgentRecord, AttributeValue, NodeStatus, PublicNodeRecord, PUBLIC_NODES_FILE,
};
use crate::store::{RegistryStore, StoreError};

/// Default Monero daemon RPC port for nodes that do not advertise one
pub const DEFAULT_RPC_PORT: u16 = 18081;
/// Default Monero P2P port
pub const DEFAULT_P2P_PORT: u16 = 18080;

/// Attribute opting a daemon into the public node registry
pub const IS_PUBLIC_NODE_ATTR: &str = "is_public_node";

fn empty_registry() -> Value {
    json!({ "nodes": [], "version": 1 })
}

/// Locked writer for `public_nodes.json`
#[derive(Debug, Clone)]
pub struct StatusUpdater {
    store: RegistryStore,
}

impl StatusUpdater {
    pub fn new(store: RegistryStore) -> Self {
        Self { store }
    }

    /// Set `status` on the node owned by `agent_id` and stamp `registered_at`.
    ///
    /// Only those two fields of the entry are touched; everything else in the
    /// document is written back as found. Returns `Ok(false)` when no node has
    /// that agent id. A missing document is created empty first.
    pub fn try_update(&self, agent_id: &str, status: NodeStatus) -> Result<bool, StoreError> {
        let path = self.store.document_path(PUBLIC_NODES_FILE);
        let updated = self.store.update(PUBLIC_NODES_FILE, empty_registry, |doc| {
            let nodes = doc
                .get_mut("nodes")
                .and_then(Value::as_array_mut)
                .ok_or_else(|| StoreError::Layout {
                    path: path.clone(),
                    reason: "'nodes' is not a list".to_string(),
                })?;

            let Some(node) = nodes
                .iter_mut()
                .filter_map(Value::as_object_mut)
                .find(|node| node.get("agent_id").and_then(Value::as_str) == Some(agent_id))
            else {
                return Ok(false);
            };

            node.insert("status".to_string(), json!(status.as_str()));
            node.insert("registered_at".to_string(), json!(unix_now()));
            Ok(true)
        })?;

        if updated {
            info!("Public node {} status set to {}", agent_id, status);
        } else {
            warn!("Public node {} not found in {}", agent_id, path.display());
        }
        Ok(updated)
    }

    /// [`try_update`](Self::try_update) with failures logged and reported as `false`
    pub fn update(&self, agent_id: &str, status: NodeStatus) -> bool {
        match self.try_update(agent_id, status) {
            Ok(updated) => updated,
            Err(e) => {
                error!("Failed to update status of public node {}: {}", agent_id, e);
                false
            }
        }
    }

    /// Populate the registry from agents opted in with `is_public_node`.
    ///
    /// Only agents running a daemon with a known IP qualify. Seeding is a no-op
    /// once the document holds any node, so agents that already reported a
    /// status are never reset. Returns the number of nodes written.
    pub fn seed_from_agents(&self, agents: &[AgentRecord]) -> Result<usize, StoreError> {
        let path = self.store.document_path(PUBLIC_NODES_FILE);

        let mut seeded = Vec::new();
        for agent in agents.iter().filter(|a| a.flag(IS_PUBLIC_NODE_ATTR)) {
            if !runs_daemon(agent) {
                debug!("Skipping public node {}: no daemon", agent.id);
                continue;
            }
            let Some(ip_addr) = agent.ip_addr.clone() else {
                warn!("Skipping public node {}: no ip_addr", agent.id);
                continue;
            };
            let node = PublicNodeRecord {
                agent_id: agent.id.clone(),
                ip_addr,
                rpc_port: agent.agent_rpc_port.unwrap_or(DEFAULT_RPC_PORT),
                p2p_port: Some(agent.p2p_port.unwrap_or(DEFAULT_P2P_PORT)),
                status: NodeStatus::Available,
                registered_at: 0.0,
                attributes: (!agent.attributes.is_empty()).then(|| agent.attributes.clone()),
            };
            seeded.push(serde_json::to_value(&node).map_err(|source| StoreError::Serialize {
                path: path.clone(),
                source,
            })?);
        }

        let count = self.store.update(PUBLIC_NODES_FILE, empty_registry, |doc| {
            let nodes = doc
                .get_mut("nodes")
                .and_then(Value::as_array_mut)
                .ok_or_else(|| StoreError::Layout {
                    path: path.clone(),
                    reason: "'nodes' is not a list".to_string(),
                })?;
            if !nodes.is_empty() {
                debug!("{} already holds {} nodes, not seeding", path.display(), nodes.len());
                return Ok(0);
            }
            let count = seeded.len();
            nodes.extend(seeded);
            Ok(count)
        })?;

        if count > 0 {
            info!("Seeded {} public nodes into {}", count, path.display());
        }
        Ok(count)
    }
}

/// Generator entries carry `daemon: bool`; agent-written ones only a daemon port
fn runs_daemon(agent: &AgentRecord) -> bool {
    match agent.extra.get("daemon") {
        Some(daemon) => AttributeValue::from(daemon).as_bool(),
        None => agent.agent_rpc_port.is_some(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn registry(dir: &TempDir, nodes: Value) -> StatusUpdater {
        let store = RegistryStore::open(dir.path()).unwrap();
        store.write(PUBLIC_NODES_FILE, &json!({"version": 3, "nodes": nodes})).unwrap();
        StatusUpdater::new(store)
    }

    fn read(dir: &TempDir) -> Value {
        let text = fs::read_to_string(dir.path().join(PUBLIC_NODES_FILE)).unwrap();
        serde_json::from_str(&text).unwrap()
    }

    #[test]
    fn test_update_touches_only_status_and_timestamp() {
        let dir = TempDir::new().unwrap();
        let updater = registry(&dir, json!([
            {"agent_id": "user000", "ip_addr": "10.0.0.10", "rpc_port": 18081, "status": "available",
             "registered_at": 0.0, "operator": "lab"},
            {"agent_id": "user001", "ip_addr": "10.0.0.11", "rpc_port": 18081, "status": "available",
             "registered_at": 0.0}
        ]));

        assert!(updater.try_update("user000", NodeStatus::Busy).unwrap());

        let doc = read(&dir);
        assert_eq!(doc["version"], json!(3));
        assert_eq!(doc["nodes"][0]["status"], json!("busy"));
        assert_eq!(doc["nodes"][0]["operator"], json!("lab"));
        assert!(doc["nodes"][0]["registered_at"].as_f64().unwrap() > 0.0);
        assert_eq!(doc["nodes"][1]["status"], json!("available"));
        assert_eq!(doc["nodes"][1]["registered_at"], json!(0.0));
    }

    #[test]
    fn test_unknown_node_is_not_found() {
        let dir = TempDir::new().unwrap();
        let updater = registry(&dir, json!([]));
        assert!(!updater.try_update("user404", NodeStatus::Offline).unwrap());
        assert!(!updater.update("user404", NodeStatus::Offline));
    }

    #[test]
    fn test_missing_document_is_created_then_not_found() {
        let dir = TempDir::new().unwrap();
        let updater = StatusUpdater::new(RegistryStore::open(dir.path()).unwrap());
        assert!(!updater.update("user000", NodeStatus::Available));
        assert_eq!(read(&dir), json!({"nodes": [], "version": 1}));
    }

    #[test]
    fn test_bad_layout_degrades_to_false() {
        let dir = TempDir::new().unwrap();
        let store = RegistryStore::open(dir.path()).unwrap();
        store.write(PUBLIC_NODES_FILE, &json!({"nodes": {"user000": {}}})).unwrap();
        let updater = StatusUpdater::new(store);
        assert!(matches!(
            updater.try_update("user000", NodeStatus::Busy),
            Err(StoreError::Layout { .. })
        ));
        assert!(!updater.update("user000", NodeStatus::Busy));
    }

    #[test]
    fn test_seed_only_public_daemons_once() {
        let dir = TempDir::new().unwrap();
        let updater = StatusUpdater::new(RegistryStore::open(dir.path()).unwrap());

        let agents: Vec<AgentRecord> = [
            json!({"id": "user000", "ip_addr": "10.0.0.10", "daemon": true, "daemon_rpc_port": 28081,
                   "attributes": {"is_public_node": "true"}}),
            json!({"id": "user001", "ip_addr": "10.0.0.11", "daemon": true,
                   "attributes": {"is_public_node": "yes"}}),
            json!({"id": "user002", "ip_addr": "10.0.0.12", "daemon": false,
                   "attributes": {"is_public_node": "true"}}),
            json!({"id": "user003", "ip_addr": "10.0.0.13", "daemon": true}),
        ]
        .iter()
        .filter_map(|v| AgentRecord::from_json(v, None, String::new))
        .collect();

        assert_eq!(updater.seed_from_agents(&agents).unwrap(), 2);
        let doc = read(&dir);
        let nodes = doc["nodes"].as_array().unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0]["rpc_port"], json!(28081));
        assert_eq!(nodes[1]["rpc_port"], json!(DEFAULT_RPC_PORT));
        assert_eq!(nodes[1]["p2p_port"], json!(DEFAULT_P2P_PORT));
        assert_eq!(nodes[1]["status"], json!("available"));
        assert_eq!(doc["version"], json!(1));

        assert!(updater.try_update("user000", NodeStatus::Busy).unwrap());
        assert_eq!(updater.seed_from_agents(&agents).unwrap(), 0);
        assert_eq!(read(&dir)["nodes"][0]["status"], json!("busy"));
    }
}
