//! Idempotent self-registration into `agent_registry.json`.

use std::fmt;

use log::{debug, error, info};
use serde_json::{json, Map, Value};

use super::types::{entry_id, unix_now, AttributeValue, Attributes};
use super::{AGENTS_KEY, AGENT_REGISTRY_FILE};
use crate::store::{RegistryStore, StoreError};

/// Fields an agent supplies about itself. Only fields that are set are
/// written; anything already in the registry entry is left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Registration {
    pub id: String,
    pub agent_type: Option<String>,
    pub ip_addr: Option<String>,
    pub p2p_port: Option<u16>,
    pub agent_rpc_port: Option<u16>,
    pub wallet_rpc_port: Option<u16>,
    pub attributes: Attributes,
    pub wallet_address: Option<String>,
    pub hash_rate: Option<f64>,
}

impl Registration {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn agent_type(mut self, agent_type: impl Into<String>) -> Self {
        self.agent_type = Some(agent_type.into());
        self
    }

    pub fn ip_addr(mut self, ip_addr: impl Into<String>) -> Self {
        self.ip_addr = Some(ip_addr.into());
        self
    }

    pub fn p2p_port(mut self, port: u16) -> Self {
        self.p2p_port = Some(port);
        self
    }

    pub fn agent_rpc_port(mut self, port: u16) -> Self {
        self.agent_rpc_port = Some(port);
        self
    }

    pub fn wallet_rpc_port(mut self, port: u16) -> Self {
        self.wallet_rpc_port = Some(port);
        self
    }

    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn wallet_address(mut self, address: impl Into<String>) -> Self {
        self.wallet_address = Some(address.into());
        self
    }

    pub fn hash_rate(mut self, hash_rate: f64) -> Self {
        self.hash_rate = Some(hash_rate);
        self
    }

    /// The supplied fields as they appear in the registry entry
    fn fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert("id".to_string(), Value::String(self.id.clone()));
        if let Some(agent_type) = &self.agent_type {
            fields.insert("type".to_string(), json!(agent_type));
        }
        if let Some(ip_addr) = &self.ip_addr {
            fields.insert("ip_addr".to_string(), json!(ip_addr));
        }
        if let Some(port) = self.p2p_port {
            fields.insert("p2p_port".to_string(), json!(port));
        }
        if let Some(port) = self.agent_rpc_port {
            fields.insert("agent_rpc_port".to_string(), json!(port));
        }
        if let Some(port) = self.wallet_rpc_port {
            fields.insert("wallet_rpc_port".to_string(), json!(port));
        }
        if !self.attributes.is_empty() {
            let attributes: Map<String, Value> = self
                .attributes
                .iter()
                .map(|(k, v)| (k.clone(), Value::from(v)))
                .collect();
            fields.insert("attributes".to_string(), Value::Object(attributes));
        }
        if let Some(address) = &self.wallet_address {
            fields.insert("wallet_address".to_string(), json!(address));
        }
        if let Some(hash_rate) = self.hash_rate {
            fields.insert("hash_rate".to_string(), json!(hash_rate));
        }
        fields
    }
}

/// What a registration did to the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationOutcome {
    Created,
    Updated,
    Unchanged,
}

impl fmt::Display for RegistrationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationOutcome::Created => write!(f, "created"),
            RegistrationOutcome::Updated => write!(f, "updated"),
            RegistrationOutcome::Unchanged => write!(f, "unchanged"),
        }
    }
}

/// Writes an agent's own entry into the shared agent registry
#[derive(Debug, Clone)]
pub struct RegistrationWriter {
    store: RegistryStore,
}

impl RegistrationWriter {
    pub fn new(store: RegistryStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &RegistryStore {
        &self.store
    }

    /// Upsert `registration` under the registry lock.
    ///
    /// An existing entry with the same id has the supplied fields merged into
    /// it (attributes key by key); otherwise a new entry is appended with a
    /// capture timestamp. Both the list and the map-keyed-by-id layouts of the
    /// `agents` bucket are preserved as found.
    pub fn register(&self, registration: &Registration) -> Result<RegistrationOutcome, StoreError> {
        let path = self.store.document_path(AGENT_REGISTRY_FILE);
        let fields = registration.fields();

        let outcome = self.store.update(
            AGENT_REGISTRY_FILE,
            || json!({ AGENTS_KEY: [] }),
            |doc| {
                let root = doc.as_object_mut().ok_or_else(|| StoreError::Layout {
                    path: path.clone(),
                    reason: "registry root is not a JSON object".to_string(),
                })?;
                let agents = root
                    .entry(AGENTS_KEY)
                    .or_insert_with(|| Value::Array(Vec::new()));
                upsert(agents, &registration.id, fields).ok_or_else(|| StoreError::Layout {
                    path: path.clone(),
                    reason: format!("'{}' is neither a list nor a map", AGENTS_KEY),
                })
            },
        )?;

        match outcome {
            RegistrationOutcome::Unchanged => {
                debug!("Registration of {} already up to date", registration.id)
            }
            _ => info!("Registration of {} {} in {}", registration.id, outcome, path.display()),
        }
        Ok(outcome)
    }

    /// Register, logging instead of failing.
    ///
    /// Returns `false` when the agent could not be written and is running
    /// undiscoverable.
    pub fn register_or_degrade(&self, registration: &Registration) -> bool {
        match self.register(registration) {
            Ok(_) => true,
            Err(e) => {
                error!(
                    "Agent {} could not register and will not be discoverable: {}",
                    registration.id, e
                );
                false
            }
        }
    }

    /// Record the wallet address once the agent's wallet is up
    pub fn record_wallet_address(&self, id: &str, address: &str) -> Result<RegistrationOutcome, StoreError> {
        self.register(&Registration::new(id).wallet_address(address))
    }
}

/// Merge `fields` into the entry for `id`, appending one if absent.
/// Returns `None` if `agents` has an unusable layout.
fn upsert(agents: &mut Value, id: &str, mut fields: Map<String, Value>) -> Option<RegistrationOutcome> {
    let existing = match agents {
        Value::Array(entries) => entries
            .iter_mut()
            .filter_map(Value::as_object_mut)
            .find(|entry| entry_id(entry).as_deref() == Some(id)),
        Value::Object(entries) => entries.get_mut(id).and_then(Value::as_object_mut),
        _ => return None,
    };

    if let Some(entry) = existing {
        return Some(if merge(entry, fields) {
            RegistrationOutcome::Updated
        } else {
            RegistrationOutcome::Unchanged
        });
    }

    fields.insert("timestamp".to_string(), json!(unix_now()));
    match agents {
        Value::Array(entries) => entries.push(Value::Object(fields)),
        Value::Object(entries) => {
            entries.insert(id.to_string(), Value::Object(fields));
        }
        _ => unreachable!("layout checked above"),
    }
    Some(RegistrationOutcome::Created)
}

/// Returns true if anything changed
fn merge(entry: &mut Map<String, Value>, fields: Map<String, Value>) -> bool {
    let mut changed = false;
    for (key, value) in fields {
        match (entry.get_mut(&key), value) {
            (Some(Value::Object(current)), Value::Object(incoming)) if key == "attributes" => {
                for (name, v) in incoming {
                    if current.get(&name) != Some(&v) {
                        current.insert(name, v);
                        changed = true;
                    }
                }
            }
            (Some(current), value) => {
                if *current != value {
                    *current = value;
                    changed = true;
                }
            }
            (None, value) => {
                entry.insert(key, value);
                changed = true;
            }
        }
    }
    changed
}
