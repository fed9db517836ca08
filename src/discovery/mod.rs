//! # Agent Discovery
//!
//! Read side of the registry: aggregates every registry file in the shared
//! directory into typed views and answers the lookups agents need at runtime
//! (miners, wallet agents, distribution recipients, public nodes).
//!
//! ## Caching
//!
//! A full directory scan is cheap but not free, and agents poll discovery in
//! their main loops. Each query shape therefore has its own TTL cache:
//!
//! | Query                      | Default TTL |
//! |----------------------------|-------------|
//! | raw aggregate snapshot     | 5s          |
//! | miners                     | 10s         |
//! | wallet agents              | 10s         |
//! | distribution recipients    | 10s         |
//! | public nodes               | 5s          |
//!
//! Every query accepts `force_refresh` to bypass its cache (and the snapshot
//! cache underneath it).
//!
//! ## Tolerance
//!
//! - Missing files yield empty results for their category
//! - Malformed files are logged and skipped during aggregation
//! - Directory or file access errors are returned as [`DiscoveryError`]

pub mod cache;
pub mod snapshot;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};

use crate::config::RegistryConfig;
use crate::registry::{
    agent_types, AgentRecord, AttributeValue, NodeStatus, PublicNodeRecord, PublicNodeRegistry,
    PUBLIC_NODES_FILE,
};
use crate::store::{read_document, RegistryStore, StoreError};

pub use cache::{CacheTtls, TtlCache};
pub use snapshot::{normalize_bucket, Bucket, RegistrySnapshot, RegistryStats};

/// Attribute marking an agent as a miner
pub const IS_MINER_ATTR: &str = "is_miner";
/// Attribute marking an agent as wallet-bearing
pub const HAS_WALLET_ATTR: &str = "has_wallet";
/// Opt-in attribute for receiving mining reward distributions
pub const CAN_RECEIVE_DISTRIBUTIONS_ATTR: &str = "can_receive_distributions";

/// Errors surfaced by discovery queries
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Failed to prepare shared state directory: {0}")]
    SharedDir(#[source] StoreError),

    #[error("Failed to load agent registry: {0}")]
    Registry(#[source] StoreError),

    #[error("Failed to load public nodes registry: {0}")]
    PublicNodes(#[source] StoreError),
}

#[derive(Debug)]
struct DiscoveryCaches {
    registry: TtlCache<Arc<RegistrySnapshot>>,
    miners: TtlCache<Vec<AgentRecord>>,
    wallets: TtlCache<Vec<AgentRecord>>,
    distribution_recipients: TtlCache<Vec<AgentRecord>>,
    public_nodes: TtlCache<Vec<PublicNodeRecord>>,
}

impl DiscoveryCaches {
    fn new(ttls: &CacheTtls) -> Self {
        Self {
            registry: TtlCache::new(ttls.registry),
            miners: TtlCache::new(ttls.miners),
            wallets: TtlCache::new(ttls.wallets),
            distribution_recipients: TtlCache::new(ttls.distribution_recipients),
            public_nodes: TtlCache::new(ttls.public_nodes),
        }
    }
}

/// Cached reader over the shared registry directory.
///
/// One instance per process; it is not shared between agents.
#[derive(Debug)]
pub struct AgentDiscovery {
    shared_dir: PathBuf,
    caches: DiscoveryCaches,
}

impl AgentDiscovery {
    /// Create a reader for `shared_dir` with default TTLs, creating the directory if needed
    pub fn new(shared_dir: impl Into<PathBuf>) -> Result<Self, DiscoveryError> {
        Self::with_ttls(shared_dir, CacheTtls::default())
    }

    pub fn with_ttls(shared_dir: impl Into<PathBuf>, ttls: CacheTtls) -> Result<Self, DiscoveryError> {
        let store = RegistryStore::open(shared_dir).map_err(DiscoveryError::SharedDir)?;
        Ok(Self::from_store(&store, ttls))
    }

    pub fn from_store(store: &RegistryStore, ttls: CacheTtls) -> Self {
        info!(
            "AgentDiscovery initialized with shared state directory: {}",
            store.dir().display()
        );
        Self {
            shared_dir: store.dir().to_path_buf(),
            caches: DiscoveryCaches::new(&ttls),
        }
    }

    pub fn from_config(config: &RegistryConfig) -> Result<Self, DiscoveryError> {
        Self::with_ttls(&config.shared_dir, config.cache)
    }

    pub fn shared_dir(&self) -> &Path {
        &self.shared_dir
    }

    /// Aggregated snapshot of every registry file
    pub fn get_registry(&mut self, force_refresh: bool) -> Result<Arc<RegistrySnapshot>, DiscoveryError> {
        if !force_refresh {
            if let Some(snapshot) = self.caches.registry.get() {
                debug!("Returning cached agent registry");
                return Ok(snapshot);
            }
        }

        debug!("Loading agent registry from {}", self.shared_dir.display());
        let snapshot = Arc::new(
            RegistrySnapshot::scan(&self.shared_dir).map_err(DiscoveryError::Registry)?,
        );
        self.caches.registry.put(Arc::clone(&snapshot));
        info!("Loaded agent registry with {} agents", snapshot.agents.len());
        Ok(snapshot)
    }

    /// Agents whose `type` field equals `agent_type`
    pub fn find_by_type(&mut self, agent_type: &str, force_refresh: bool) -> Result<Vec<AgentRecord>, DiscoveryError> {
        let snapshot = self.get_registry(force_refresh)?;
        let matching: Vec<AgentRecord> = snapshot
            .agents
            .iter()
            .filter(|record| record.is_type(agent_type))
            .cloned()
            .collect();
        debug!("Found {} agents of type '{}'", matching.len(), agent_type);
        Ok(matching)
    }

    /// Agents whose attribute `name` loosely matches `value`
    pub fn find_by_attribute(
        &mut self,
        name: &str,
        value: &AttributeValue,
        force_refresh: bool,
    ) -> Result<Vec<AgentRecord>, DiscoveryError> {
        let snapshot = self.get_registry(force_refresh)?;
        let matching: Vec<AgentRecord> = snapshot
            .agents
            .iter()
            .filter(|record| record.attribute(name).is_some_and(|v| v.matches(value)))
            .cloned()
            .collect();
        debug!("Found {} agents with {}={}", matching.len(), name, value);
        Ok(matching)
    }

    /// Miner agents, enriched with RPC ports from the agents bucket.
    ///
    /// Sources, first non-empty wins: `type == "miner"`, a truthy `is_miner`
    /// attribute, then the legacy `miners.json` bucket.
    pub fn get_miners(&mut self, force_refresh: bool) -> Result<Vec<AgentRecord>, DiscoveryError> {
        if !force_refresh {
            if let Some(miners) = self.caches.miners.get() {
                debug!("Returning cached miner agents");
                return Ok(miners);
            }
        }

        let snapshot = self.get_registry(force_refresh)?;
        let mut miners = layered(&snapshot, agent_types::MINER, IS_MINER_ATTR, &snapshot.miners);
        for miner in &mut miners {
            enrich_from_agents(miner, &snapshot);
        }

        info!("Found {} miner agents", miners.len());
        self.caches.miners.put(miners.clone());
        Ok(miners)
    }

    /// Wallet-bearing agents.
    ///
    /// Sources, first non-empty wins: `type == "wallet"`, a truthy `has_wallet`
    /// attribute, the legacy `wallets.json` bucket, then any agent carrying a
    /// wallet RPC port or a truthy `wallet` flag.
    pub fn get_wallet_agents(&mut self, force_refresh: bool) -> Result<Vec<AgentRecord>, DiscoveryError> {
        if !force_refresh {
            if let Some(wallets) = self.caches.wallets.get() {
                debug!("Returning cached wallet agents");
                return Ok(wallets);
            }
        }

        let snapshot = self.get_registry(force_refresh)?;
        let wallets = wallet_agents(&snapshot);
        info!("Found {} wallet agents", wallets.len());
        self.caches.wallets.put(wallets.clone());
        Ok(wallets)
    }

    /// Block controllers by type, else the legacy `block_controller.json` bucket
    pub fn get_block_controllers(&mut self, force_refresh: bool) -> Result<Vec<AgentRecord>, DiscoveryError> {
        let snapshot = self.get_registry(force_refresh)?;
        let mut controllers: Vec<AgentRecord> = snapshot
            .agents
            .iter()
            .filter(|record| record.is_type(agent_types::BLOCK_CONTROLLER))
            .cloned()
            .collect();
        if controllers.is_empty() {
            controllers = snapshot.block_controllers.clone();
        }
        info!("Found {} block controller agents", controllers.len());
        Ok(controllers)
    }

    /// Wallet agents eligible for mining reward distributions.
    ///
    /// Returns only the agents that opted in via `can_receive_distributions`;
    /// if none did, returns every wallet agent. The two pools are never mixed.
    pub fn get_distribution_recipients(&mut self, force_refresh: bool) -> Result<Vec<AgentRecord>, DiscoveryError> {
        if !force_refresh {
            if let Some(recipients) = self.caches.distribution_recipients.get() {
                debug!("Returning cached distribution recipients");
                return Ok(recipients);
            }
        }

        // Computed from the snapshot, independent of the wallet cache
        let snapshot = self.get_registry(force_refresh)?;
        let (opted_in, opted_out): (Vec<AgentRecord>, Vec<AgentRecord>) = wallet_agents(&snapshot)
            .into_iter()
            .partition(|agent| agent.flag(CAN_RECEIVE_DISTRIBUTIONS_ATTR));

        let recipients = if opted_in.is_empty() {
            info!(
                "No distribution-enabled recipients found, falling back to all {} wallet agents",
                opted_out.len()
            );
            opted_out
        } else {
            info!("Found {} distribution-enabled recipients", opted_in.len());
            opted_in
        };

        self.caches.distribution_recipients.put(recipients.clone());
        Ok(recipients)
    }

    /// Nodes from `public_nodes.json`, optionally filtered by status.
    ///
    /// The unfiltered list is cached; the filter is applied per call.
    pub fn get_public_nodes(
        &mut self,
        status_filter: Option<NodeStatus>,
        force_refresh: bool,
    ) -> Result<Vec<PublicNodeRecord>, DiscoveryError> {
        let nodes = match self.caches.public_nodes.get().filter(|_| !force_refresh) {
            Some(nodes) => nodes,
            None => {
                let nodes = load_public_nodes(&self.shared_dir.join(PUBLIC_NODES_FILE))
                    .map_err(DiscoveryError::PublicNodes)?;
                self.caches.public_nodes.put(nodes.clone());
                nodes
            }
        };

        let filtered: Vec<PublicNodeRecord> = match status_filter {
            Some(status) => nodes.into_iter().filter(|n| n.status == status).collect(),
            None => nodes,
        };
        debug!(
            "Found {} public nodes (status filter: {})",
            filtered.len(),
            status_filter.map_or("none", |s| s.as_str())
        );
        Ok(filtered)
    }

    /// Look up one agent, searching the agents bucket before any other
    pub fn get_agent_by_id(&mut self, id: &str, force_refresh: bool) -> Result<Option<AgentRecord>, DiscoveryError> {
        let snapshot = self.get_registry(force_refresh)?;
        let found = snapshot.find_agent(id).cloned();
        if found.is_none() {
            debug!("Agent with ID '{}' not found", id);
        }
        Ok(found)
    }

    pub fn get_registry_stats(&mut self, force_refresh: bool) -> Result<RegistryStats, DiscoveryError> {
        let snapshot = self.get_registry(force_refresh)?;
        let mut stats = RegistryStats::from_snapshot(&snapshot);
        stats.cache_age = self.caches.registry.age().map(|age| age.as_secs_f64());
        stats.cache_valid = self.caches.registry.is_valid();
        Ok(stats)
    }

    /// Force a rescan of the shared directory
    pub fn refresh_cache(&mut self) -> Result<Arc<RegistrySnapshot>, DiscoveryError> {
        info!("Forcing cache refresh");
        self.get_registry(true)
    }

    /// Drop every cached view; the next query of each shape goes to disk
    pub fn invalidate_caches(&mut self) {
        self.caches.registry.invalidate();
        self.caches.miners.invalidate();
        self.caches.wallets.invalidate();
        self.caches.distribution_recipients.invalidate();
        self.caches.public_nodes.invalidate();
    }
}

/// Type match, then tolerant flag, then the dedicated legacy bucket
fn layered(snapshot: &RegistrySnapshot, agent_type: &str, flag: &str, legacy: &[AgentRecord]) -> Vec<AgentRecord> {
    let by_type: Vec<AgentRecord> = snapshot
        .agents
        .iter()
        .filter(|record| record.is_type(agent_type))
        .cloned()
        .collect();
    if !by_type.is_empty() {
        return by_type;
    }

    let by_flag: Vec<AgentRecord> = snapshot
        .agents
        .iter()
        .filter(|record| record.flag(flag))
        .cloned()
        .collect();
    if !by_flag.is_empty() {
        debug!("No agents of type '{}', using '{}' attribute", agent_type, flag);
        return by_flag;
    }

    if !legacy.is_empty() {
        debug!("No '{}' agents in main registry, using legacy bucket", agent_type);
    }
    legacy.to_vec()
}

fn wallet_agents(snapshot: &RegistrySnapshot) -> Vec<AgentRecord> {
    let wallets = layered(snapshot, agent_types::WALLET, HAS_WALLET_ATTR, &snapshot.wallets);
    if !wallets.is_empty() {
        return wallets;
    }
    snapshot
        .agents
        .iter()
        .filter(|record| record.wallet_rpc_port.is_some() || record.flag("wallet"))
        .cloned()
        .collect()
}

/// Copy missing ports from the agents-bucket entry with the same `ip_addr`
fn enrich_from_agents(miner: &mut AgentRecord, snapshot: &RegistrySnapshot) {
    if miner.agent_rpc_port.is_some() && miner.wallet_rpc_port.is_some() {
        return;
    }
    let Some(ip_addr) = miner.ip_addr.clone() else {
        debug!("Miner {} has no ip_addr to join on", miner.id);
        return;
    };
    let Some(agent) = snapshot.agent_by_ip(&ip_addr) else {
        debug!("No matching agent found for miner {} with IP {}", miner.id, ip_addr);
        return;
    };

    if miner.agent_rpc_port.is_none() && agent.agent_rpc_port.is_some() {
        miner.agent_rpc_port = agent.agent_rpc_port;
        debug!("Added agent_rpc_port {:?} to miner {}", agent.agent_rpc_port, miner.id);
    }
    if miner.wallet_rpc_port.is_none() && agent.wallet_rpc_port.is_some() {
        miner.wallet_rpc_port = agent.wallet_rpc_port;
        debug!("Added wallet_rpc_port {:?} to miner {}", agent.wallet_rpc_port, miner.id);
    }
    if miner.p2p_port.is_none() {
        miner.p2p_port = agent.p2p_port;
    }
}

/// Parse `public_nodes.json`; a missing or empty file has no nodes.
/// Individual entries that do not fit the node schema are skipped.
fn load_public_nodes(path: &Path) -> Result<Vec<PublicNodeRecord>, StoreError> {
    let Some(doc) = read_document(path)? else {
        warn!("Public nodes registry not found at {}", path.display());
        return Ok(Vec::new());
    };

    let entries = match doc.get("nodes") {
        Some(serde_json::Value::Array(entries)) => entries,
        _ => {
            // Whole-document decode reports the precise schema problem
            return serde_json::from_value::<PublicNodeRegistry>(doc)
                .map(|registry| registry.nodes)
                .map_err(|source| StoreError::Parse {
                    path: path.to_path_buf(),
                    source,
                });
        }
    };

    Ok(entries
        .iter()
        .filter_map(|entry| match serde_json::from_value::<PublicNodeRecord>(entry.clone()) {
            Ok(node) => Some(node),
            Err(e) => {
                warn!("Skipping malformed public node entry in {}: {}", path.display(), e);
                None
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, doc: serde_json::Value) {
        fs::write(dir.path().join(name), serde_json::to_vec_pretty(&doc).unwrap()).unwrap();
    }

    fn ids(records: &[AgentRecord]) -> Vec<&str> {
        records.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn test_registry_cache_serves_identical_snapshot_within_ttl() {
        let dir = TempDir::new().unwrap();
        write(&dir, "agent_registry.json", json!({"agents": [{"id": "user000"}]}));
        let mut discovery = AgentDiscovery::with_ttls(dir.path(), CacheTtls::uniform(Duration::from_secs(60))).unwrap();

        let first = discovery.get_registry(false).unwrap();
        write(&dir, "agent_registry.json", json!({"agents": [{"id": "user000"}, {"id": "user001"}]}));
        let second = discovery.get_registry(false).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.agents.len(), 1);

        let forced = discovery.get_registry(true).unwrap();
        assert_eq!(forced.agents.len(), 2);
    }

    #[test]
    fn test_registry_cache_expires() {
        let dir = TempDir::new().unwrap();
        write(&dir, "agent_registry.json", json!({"agents": []}));
        let mut discovery = AgentDiscovery::with_ttls(dir.path(), CacheTtls::uniform(Duration::from_millis(50))).unwrap();

        assert!(discovery.get_registry(false).unwrap().agents.is_empty());
        write(&dir, "agent_registry.json", json!({"agents": [{"id": "user000"}]}));
        thread::sleep(Duration::from_millis(80));
        assert_eq!(discovery.get_registry(false).unwrap().agents.len(), 1);
    }

    #[test]
    fn test_each_query_shape_keeps_its_own_ttl() {
        let dir = TempDir::new().unwrap();
        write(&dir, "agent_registry.json", json!({"agents": [
            {"id": "user000", "type": "miner"},
            {"id": "user001", "wallet_rpc_port": 28082}
        ]}));
        let ttls = CacheTtls {
            registry: Duration::ZERO,
            miners: Duration::from_secs(60),
            wallets: Duration::from_secs(60),
            distribution_recipients: Duration::from_secs(60),
            public_nodes: Duration::from_secs(60),
        };
        let mut discovery = AgentDiscovery::with_ttls(dir.path(), ttls).unwrap();
        assert_eq!(ids(&discovery.get_miners(false).unwrap()), vec!["user000"]);
        assert_eq!(ids(&discovery.get_wallet_agents(false).unwrap()), vec!["user001"]);
        assert_eq!(ids(&discovery.get_distribution_recipients(false).unwrap()), vec!["user001"]);

        write(&dir, "agent_registry.json", json!({"agents": [
            {"id": "user000", "type": "miner"},
            {"id": "user001", "wallet_rpc_port": 28082},
            {"id": "user002", "type": "miner"},
            {"id": "user003", "wallet_rpc_port": 28082}
        ]}));

        // The snapshot is never cached, so it already shows the new agents
        assert_eq!(discovery.get_registry(false).unwrap().agents.len(), 4);
        assert_eq!(ids(&discovery.get_miners(false).unwrap()), vec!["user000"]);
        assert_eq!(ids(&discovery.get_wallet_agents(false).unwrap()), vec!["user001"]);
        assert_eq!(ids(&discovery.get_distribution_recipients(false).unwrap()), vec!["user001"]);

        assert_eq!(ids(&discovery.get_miners(true).unwrap()), vec!["user000", "user002"]);
        assert_eq!(
            ids(&discovery.get_wallet_agents(true).unwrap()),
            vec!["user001", "user003"]
        );
    }

    #[test]
    fn test_derived_caches_refresh_after_their_ttl() {
        let dir = TempDir::new().unwrap();
        write(&dir, "agent_registry.json", json!({"agents": [
            {"id": "user000", "type": "miner"},
            {"id": "user001", "wallet_rpc_port": 28082}
        ]}));
        let ttls = CacheTtls {
            registry: Duration::ZERO,
            miners: Duration::from_millis(50),
            wallets: Duration::from_millis(50),
            distribution_recipients: Duration::from_millis(50),
            public_nodes: Duration::from_secs(60),
        };
        let mut discovery = AgentDiscovery::with_ttls(dir.path(), ttls).unwrap();
        assert_eq!(ids(&discovery.get_miners(false).unwrap()), vec!["user000"]);
        assert_eq!(ids(&discovery.get_wallet_agents(false).unwrap()), vec!["user001"]);
        assert_eq!(ids(&discovery.get_distribution_recipients(false).unwrap()), vec!["user001"]);

        write(&dir, "agent_registry.json", json!({"agents": [
            {"id": "user002", "type": "miner"},
            {"id": "user003", "wallet_rpc_port": 28082, "attributes": {"can_receive_distributions": "true"}}
        ]}));
        thread::sleep(Duration::from_millis(80));

        assert_eq!(ids(&discovery.get_miners(false).unwrap()), vec!["user002"]);
        assert_eq!(ids(&discovery.get_wallet_agents(false).unwrap()), vec!["user003"]);
        assert_eq!(ids(&discovery.get_distribution_recipients(false).unwrap()), vec!["user003"]);
    }

    #[test]
    fn test_enrichment_joins_on_last_agent_with_ip() {
        let dir = TempDir::new().unwrap();
        write(&dir, "agent_registry.json", json!({"agents": [
            {"id": "stale", "ip_addr": "10.0.0.10", "daemon_rpc_port": 18081},
            {"id": "user000", "ip_addr": "10.0.0.10", "daemon_rpc_port": 28081}
        ]}));
        write(&dir, "miners.json", json!({"miners": [
            {"agent_id": "miner-a", "ip_addr": "10.0.0.10", "weight": 100}
        ]}));
        let mut discovery = AgentDiscovery::new(dir.path()).unwrap();
        let miners = discovery.get_miners(false).unwrap();
        assert_eq!(miners[0].agent_rpc_port, Some(28081));
    }

    #[test]
    fn test_new_creates_shared_directory() {
        let dir = TempDir::new().unwrap();
        let shared = dir.path().join("monerosim_shared");
        let mut discovery = AgentDiscovery::new(&shared).unwrap();
        assert!(shared.is_dir());
        assert!(discovery.get_miners(false).unwrap().is_empty());
        assert!(discovery.get_public_nodes(None, false).unwrap().is_empty());
    }

    #[test]
    fn test_find_by_type_and_attribute() {
        let dir = TempDir::new().unwrap();
        write(&dir, "agent_registry.json", json!({"agents": {
            "user000": {"type": "miner", "attributes": {"is_miner": "true", "region": "eu"}},
            "user001": {"type": "user", "attributes": {"is_miner": "false", "hashrate": 25}},
            "user002": {"type": "user", "attributes": {"is_miner": "yes"}}
        }}));
        let mut discovery = AgentDiscovery::new(dir.path()).unwrap();

        assert_eq!(ids(&discovery.find_by_type("user", false).unwrap()), vec!["user001", "user002"]);
        assert_eq!(
            ids(&discovery.find_by_attribute("is_miner", &AttributeValue::Bool(true), false).unwrap()),
            vec!["user000", "user002"]
        );
        assert_eq!(
            ids(&discovery.find_by_attribute("hashrate", &"25".into(), false).unwrap()),
            vec!["user001"]
        );
        assert!(discovery.find_by_type("wallet", false).unwrap().is_empty());
    }

    #[test]
    fn test_miners_fall_back_to_flag_then_legacy_bucket() {
        let dir = TempDir::new().unwrap();
        write(&dir, "agent_registry.json", json!({"agents": [
            {"id": "user000", "ip_addr": "10.0.0.10", "attributes": {"is_miner": "true"}},
            {"id": "user001", "ip_addr": "10.0.0.11", "attributes": {"is_miner": "false"}}
        ]}));
        let mut discovery = AgentDiscovery::new(dir.path()).unwrap();
        assert_eq!(ids(&discovery.get_miners(true).unwrap()), vec!["user000"]);

        write(&dir, "agent_registry.json", json!({"agents": [
            {"id": "user001", "ip_addr": "10.0.0.11"}
        ]}));
        write(&dir, "miners.json", json!({"miners": [
            {"agent_id": "user007", "ip_addr": "10.0.0.17", "weight": 10}
        ]}));
        assert_eq!(ids(&discovery.get_miners(true).unwrap()), vec!["user007"]);
    }

    #[test]
    fn test_legacy_miners_are_enriched_by_ip_join() {
        let dir = TempDir::new().unwrap();
        write(&dir, "agent_registry.json", json!({"agents": [
            {"id": "user000", "ip_addr": "10.0.0.10", "daemon_rpc_port": 28081, "wallet_rpc_port": 28082},
            {"id": "user001", "ip_addr": "10.0.0.11", "daemon_rpc_port": 28081}
        ]}));
        write(&dir, "miners.json", json!({"miners": [
            {"agent_id": "miner-a", "ip_addr": "10.0.0.10", "weight": 60},
            {"agent_id": "miner-b", "ip_addr": "10.0.0.99", "weight": 40}
        ]}));
        let mut discovery = AgentDiscovery::new(dir.path()).unwrap();

        let miners = discovery.get_miners(false).unwrap();
        assert_eq!(ids(&miners), vec!["miner-a", "miner-b"]);
        assert_eq!(miners[0].agent_rpc_port, Some(28081));
        assert_eq!(miners[0].wallet_rpc_port, Some(28082));
        assert_eq!(miners[0].daemon_address().as_deref(), Some("10.0.0.10:28081"));
        // No agent with that IP: returned with its own fields only
        assert_eq!(miners[1].agent_rpc_port, None);
        assert_eq!(miners[1].extra.get("weight"), Some(&json!(40)));
    }

    #[test]
    fn test_distribution_recipients_never_mix_pools() {
        let dir = TempDir::new().unwrap();
        write(&dir, "agent_registry.json", json!({"agents": [
            {"id": "user000", "wallet_rpc_port": 28082, "attributes": {"can_receive_distributions": "true"}},
            {"id": "user001", "wallet_rpc_port": 28082, "attributes": {"can_receive_distributions": "false"}},
            {"id": "user002", "wallet_rpc_port": 28082}
        ]}));
        let mut discovery = AgentDiscovery::new(dir.path()).unwrap();
        assert_eq!(ids(&discovery.get_distribution_recipients(false).unwrap()), vec!["user000"]);

        write(&dir, "agent_registry.json", json!({"agents": [
            {"id": "user001", "wallet_rpc_port": 28082, "attributes": {"can_receive_distributions": "no"}},
            {"id": "user002", "wallet_rpc_port": 28082}
        ]}));
        assert_eq!(
            ids(&discovery.get_distribution_recipients(true).unwrap()),
            vec!["user001", "user002"]
        );
    }

    #[test]
    fn test_wallet_agents_ignore_false_wallet_flag() {
        let dir = TempDir::new().unwrap();
        write(&dir, "agent_registry.json", json!({"agents": [
            {"id": "user000", "wallet": true},
            {"id": "blockcontroller", "wallet": false, "daemon": false}
        ]}));
        let mut discovery = AgentDiscovery::new(dir.path()).unwrap();
        assert_eq!(ids(&discovery.get_wallet_agents(false).unwrap()), vec!["user000"]);
    }

    #[test]
    fn test_block_controllers_from_legacy_file() {
        let dir = TempDir::new().unwrap();
        write(&dir, "block_controller.json", json!({
            "agent_id": "blockcontroller",
            "type": "block_controller",
            "target_interval": 120
        }));
        let mut discovery = AgentDiscovery::new(dir.path()).unwrap();
        assert_eq!(ids(&discovery.get_block_controllers(false).unwrap()), vec!["blockcontroller"]);
        assert_eq!(
            discovery.get_agent_by_id("blockcontroller", false).unwrap().unwrap().agent_type,
            "block_controller"
        );
    }

    #[test]
    fn test_public_nodes_status_filter_and_bad_entries() {
        let dir = TempDir::new().unwrap();
        write(&dir, "public_nodes.json", json!({"version": 1, "nodes": [
            {"agent_id": "user000", "ip_addr": "10.0.0.10", "rpc_port": 28081, "status": "available", "registered_at": 0.0},
            {"agent_id": "user001", "ip_addr": "10.0.0.11", "rpc_port": 28081, "status": "busy", "registered_at": 0.0},
            {"agent_id": "user002", "status": "available"}
        ]}));
        let mut discovery = AgentDiscovery::new(dir.path()).unwrap();

        assert_eq!(discovery.get_public_nodes(None, false).unwrap().len(), 2);
        let available = discovery.get_public_nodes(Some(NodeStatus::Available), false).unwrap();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].agent_id, "user000");
    }

    #[test]
    fn test_malformed_public_nodes_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("public_nodes.json"), "{\"nodes\": [").unwrap();
        let mut discovery = AgentDiscovery::new(dir.path()).unwrap();
        assert!(matches!(
            discovery.get_public_nodes(None, false),
            Err(DiscoveryError::PublicNodes(StoreError::Parse { .. }))
        ));
    }

    #[test]
    fn test_stats_report_cache_state() {
        let dir = TempDir::new().unwrap();
        write(&dir, "agent_registry.json", json!({"agents": [
            {"id": "user000", "type": "miner"},
            {"id": "user001", "type": "miner"},
            {"id": "user002", "type": "user"}
        ]}));
        let mut discovery = AgentDiscovery::new(dir.path()).unwrap();
        let stats = discovery.get_registry_stats(false).unwrap();
        assert_eq!(stats.total_agents, 3);
        assert_eq!(stats.agent_types.get("miner"), Some(&2));
        assert!(stats.cache_valid);

        discovery.invalidate_caches();
        assert!(discovery.get_registry_stats(false).unwrap().cache_valid);
    }
}
