//! Aggregated, normalized view over every registry file in the shared directory.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, error, warn};
use rayon::prelude::*;
use serde::Serialize;
use serde_json::Value;

use crate::registry::{unix_now, AgentRecord, AGENTS_KEY};
use crate::store::{read_document, StoreError};

/// Logical bucket a registry file feeds, decided by its file stem
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bucket {
    Agents,
    Miners,
    Wallets,
    BlockControllers,
    /// Any other `*.json` file, kept as-is under its stem
    Passthrough(String),
}

impl Bucket {
    pub fn for_stem(stem: &str) -> Self {
        match stem {
            "agent_registry" => Bucket::Agents,
            "miners" => Bucket::Miners,
            "wallets" => Bucket::Wallets,
            "block_controller" => Bucket::BlockControllers,
            other => Bucket::Passthrough(other.to_string()),
        }
    }

    /// Wrapper keys a file of this bucket may nest its entries under
    fn wrapper_keys(&self) -> &'static [&'static str] {
        match self {
            Bucket::Agents => &[AGENTS_KEY],
            Bucket::Miners => &["miners"],
            Bucket::Wallets => &["wallets"],
            Bucket::BlockControllers => &["block_controllers", "controllers"],
            Bucket::Passthrough(_) => &[],
        }
    }

    /// Prefix for positional ids of entries that carry none
    fn id_prefix(&self) -> &'static str {
        match self {
            Bucket::Agents => "agent",
            Bucket::Miners => "miner",
            Bucket::Wallets => "wallet",
            Bucket::BlockControllers => "block_controller",
            Bucket::Passthrough(_) => "entry",
        }
    }
}

/// Everything found in the shared directory at one point in time
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistrySnapshot {
    pub agents: Vec<AgentRecord>,
    pub miners: Vec<AgentRecord>,
    pub wallets: Vec<AgentRecord>,
    pub block_controllers: Vec<AgentRecord>,
    /// Unrecognized files by stem, untouched
    pub passthrough: BTreeMap<String, Value>,
    /// Unix seconds when the scan completed
    pub last_updated: f64,
}

impl RegistrySnapshot {
    /// Scan `dir` once and bucket every `*.json` file.
    ///
    /// Files with malformed JSON are logged and skipped. Failing to list the
    /// directory or to read a file is an error for the whole scan.
    pub fn scan(dir: &Path) -> Result<Self, StoreError> {
        let mut files: Vec<PathBuf> = Vec::new();
        let entries = fs::read_dir(dir).map_err(|e| StoreError::io(dir, e))?;
        for entry in entries {
            let path = entry.map_err(|e| StoreError::io(dir, e))?.path();
            if path.extension().is_some_and(|ext| ext == "json") && path.is_file() {
                files.push(path);
            }
        }
        files.sort();

        let parsed: Vec<(PathBuf, Result<Option<Value>, StoreError>)> = files
            .into_par_iter()
            .map(|path| {
                let doc = read_document(&path);
                (path, doc)
            })
            .collect();

        let mut snapshot = RegistrySnapshot::default();
        for (path, doc) in parsed {
            let doc = match doc {
                Ok(Some(doc)) => doc,
                Ok(None) => {
                    debug!("Skipping registry file without data: {}", path.display());
                    continue;
                }
                Err(e) if e.is_parse_error() => {
                    error!("Skipping unreadable registry file: {}", e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            snapshot.absorb(Bucket::for_stem(&stem), doc, &path);
        }

        snapshot.last_updated = unix_now();
        debug!(
            "Scanned {}: {} agents, {} miners, {} wallets, {} block controllers, {} other files",
            dir.display(),
            snapshot.agents.len(),
            snapshot.miners.len(),
            snapshot.wallets.len(),
            snapshot.block_controllers.len(),
            snapshot.passthrough.len()
        );
        Ok(snapshot)
    }

    fn absorb(&mut self, bucket: Bucket, doc: Value, path: &Path) {
        let records = match &bucket {
            Bucket::Passthrough(stem) => {
                self.passthrough.insert(stem.clone(), doc);
                return;
            }
            _ => normalize_bucket(&doc, &bucket),
        };
        if records.is_empty() {
            debug!("No entries found in {}", path.display());
        }
        match bucket {
            Bucket::Agents => self.agents = records,
            Bucket::Miners => self.miners = records,
            Bucket::Wallets => self.wallets = records,
            Bucket::BlockControllers => self.block_controllers = records,
            Bucket::Passthrough(_) => unreachable!("handled above"),
        }
    }

    /// Agents bucket first, then every other bucket
    pub fn find_agent(&self, id: &str) -> Option<&AgentRecord> {
        [&self.agents, &self.miners, &self.wallets, &self.block_controllers]
            .into_iter()
            .flat_map(|bucket| bucket.iter())
            .find(|record| record.id == id)
    }

    /// Agents bucket entry sharing `ip_addr`, the only join key between
    /// `miners.json` and `agent_registry.json`. When several agents share
    /// an address the last one in the file wins.
    pub fn agent_by_ip(&self, ip_addr: &str) -> Option<&AgentRecord> {
        self.agents
            .iter()
            .rfind(|record| record.ip_addr.as_deref() == Some(ip_addr))
    }
}

/// Normalize a bucket document into records that always carry an id.
///
/// Accepted layouts: a list of entries, a map keyed by id, either of those
/// nested under the bucket's wrapper key (`{"agents": [...]}`), or a single
/// flat entry (as `block_controller.json` is written).
pub fn normalize_bucket(doc: &Value, bucket: &Bucket) -> Vec<AgentRecord> {
    match doc {
        Value::Array(entries) => entries
            .iter()
            .enumerate()
            .filter_map(|(i, entry)| {
                let record = AgentRecord::from_json(entry, None, || {
                    format!("{}_{}", bucket.id_prefix(), i)
                });
                if record.is_none() {
                    debug!("Ignoring non-object entry {} in {:?} bucket", i, bucket);
                }
                record
            })
            .collect(),
        Value::Object(map) => {
            if let Some(inner) = bucket
                .wrapper_keys()
                .iter()
                .find_map(|key| map.get(*key).filter(|v| v.is_array() || v.is_object()))
            {
                return normalize_bucket(inner, bucket);
            }
            if looks_like_single_entry(map) {
                return AgentRecord::from_json(doc, None, || bucket.id_prefix().to_string())
                    .into_iter()
                    .collect();
            }
            map.iter()
                .filter_map(|(key, entry)| AgentRecord::from_json(entry, Some(key), String::new))
                .collect()
        }
        other => {
            warn!("Unexpected data format in {:?} bucket: {}", bucket, json_kind(other));
            Vec::new()
        }
    }
}

/// A flat entry has scalar identity fields rather than nested entries
fn looks_like_single_entry(map: &serde_json::Map<String, Value>) -> bool {
    ["id", "agent_id", "type", "ip_addr"]
        .iter()
        .any(|key| map.get(*key).is_some_and(|v| v.is_string()))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

/// Summary counts over a snapshot
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub total_agents: usize,
    pub total_miners: usize,
    pub total_wallets: usize,
    pub total_block_controllers: usize,
    pub agent_types: BTreeMap<String, usize>,
    pub other_files: Vec<String>,
    pub last_updated: f64,
    /// Age of the cached snapshot in seconds
    pub cache_age: Option<f64>,
    pub cache_valid: bool,
}

impl RegistryStats {
    pub fn from_snapshot(snapshot: &RegistrySnapshot) -> Self {
        let mut agent_types = BTreeMap::new();
        for record in &snapshot.agents {
            *agent_types.entry(record.agent_type.clone()).or_insert(0) += 1;
        }
        Self {
            total_agents: snapshot.agents.len(),
            total_miners: snapshot.miners.len(),
            total_wallets: snapshot.wallets.len(),
            total_block_controllers: snapshot.block_controllers.len(),
            agent_types,
            other_files: snapshot.passthrough.keys().cloned().collect(),
            last_updated: snapshot.last_updated,
            cache_age: None,
            cache_valid: false,
        }
    }
}
