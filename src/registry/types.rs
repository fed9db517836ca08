//! Typed registry records.
//!
//! Registry files are written by several generations of tooling (the config
//! generator, Python agents, this crate), so field names and value types drift.
//! All of that tolerance lives here: raw JSON is converted into
//! [`AgentRecord`] / [`PublicNodeRecord`] once, at ingestion, and the rest of
//! the crate works with the typed view.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Well-known agent type strings. The field itself is open-ended.
pub mod agent_types {
    pub const MINER: &str = "miner";
    pub const USER: &str = "user";
    pub const WALLET: &str = "wallet";
    pub const BLOCK_CONTROLLER: &str = "block_controller";
    pub const UNKNOWN: &str = "unknown";
}

/// Current time as fractional unix seconds
pub fn unix_now() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Attribute value as found in registry files: the same logical flag shows up
/// as `"true"`, `true` or `1` depending on who wrote it.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    String(String),
    Bool(bool),
    Number(f64),
}

impl AttributeValue {
    /// Tolerant boolean coercion used for every flag lookup.
    ///
    /// Strings `true`/`1`/`yes`/`on` (any case, surrounding whitespace ignored)
    /// are true; numbers are true when non-zero.
    pub fn as_bool(&self) -> bool {
        match self {
            AttributeValue::Bool(b) => *b,
            AttributeValue::Number(n) => *n != 0.0,
            AttributeValue::String(s) => parse_bool(s),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Number(n) => Some(*n),
            AttributeValue::String(s) => s.trim().parse().ok(),
            AttributeValue::Bool(_) => None,
        }
    }

    /// Loose comparison used by attribute queries.
    ///
    /// A boolean query matches any value whose coercion agrees with it; other
    /// queries compare the scalar text, so `"25"` matches `25`.
    pub fn matches(&self, query: &AttributeValue) -> bool {
        match (self, query) {
            (_, AttributeValue::Bool(b)) => self.as_bool() == *b,
            (AttributeValue::Number(a), AttributeValue::Number(b)) => a == b,
            (AttributeValue::String(a), AttributeValue::String(b)) => a == b,
            _ => self.to_string() == query.to_string(),
        }
    }
}

/// Truthy-string rule shared by all flag lookups
pub fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::String(s) => write!(f, "{}", s),
            AttributeValue::Bool(b) => write!(f, "{}", b),
            AttributeValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
                write!(f, "{}", *n as i64)
            }
            AttributeValue::Number(n) => write!(f, "{}", n),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::String(s.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::String(s)
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        AttributeValue::Bool(b)
    }
}

impl From<f64> for AttributeValue {
    fn from(n: f64) -> Self {
        AttributeValue::Number(n)
    }
}

impl From<&Value> for AttributeValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::String(s) => AttributeValue::String(s.clone()),
            Value::Bool(b) => AttributeValue::Bool(*b),
            Value::Number(n) => AttributeValue::Number(n.as_f64().unwrap_or_default()),
            Value::Null => AttributeValue::String(String::new()),
            // Nested structures are opaque to queries; keep their JSON text
            other => AttributeValue::String(other.to_string()),
        }
    }
}

impl From<&AttributeValue> for Value {
    fn from(value: &AttributeValue) -> Self {
        match value {
            AttributeValue::String(s) => Value::String(s.clone()),
            AttributeValue::Bool(b) => Value::Bool(*b),
            AttributeValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
        }
    }
}

impl Serialize for AttributeValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            AttributeValue::String(s) => serializer.serialize_str(s),
            AttributeValue::Bool(b) => serializer.serialize_bool(*b),
            AttributeValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
                serializer.serialize_i64(*n as i64)
            }
            AttributeValue::Number(n) => serializer.serialize_f64(*n),
        }
    }
}

impl<'de> Deserialize<'de> for AttributeValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(|v| AttributeValue::from(&v))
    }
}

pub type Attributes = BTreeMap<String, AttributeValue>;

/// One agent as seen through any of the registry buckets
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub agent_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_addr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p2p_port: Option<u16>,
    /// Daemon RPC port (`daemon_rpc_port` in files written by the config generator)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_rpc_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_rpc_port: Option<u16>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: Attributes,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    /// Fields this crate does not interpret, kept so nothing is lost on output
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

const ID_KEYS: &[&str] = &["id", "agent_id"];
const DAEMON_PORT_KEYS: &[&str] = &["agent_rpc_port", "daemon_rpc_port", "rpc_port"];
const HASH_RATE_KEYS: &[&str] = &["hash_rate", "hashrate"];
const CONSUMED_KEYS: &[&str] = &[
    "id",
    "type",
    "ip_addr",
    "p2p_port",
    "agent_rpc_port",
    "daemon_rpc_port",
    "rpc_port",
    "wallet_rpc_port",
    "attributes",
    "wallet_address",
    "hash_rate",
    "hashrate",
    "timestamp",
];

impl AgentRecord {
    /// Minimal record with only an id and a type
    pub fn new(id: impl Into<String>, agent_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            agent_type: agent_type.into(),
            ip_addr: None,
            p2p_port: None,
            agent_rpc_port: None,
            wallet_rpc_port: None,
            attributes: Attributes::new(),
            wallet_address: None,
            hash_rate: None,
            timestamp: None,
            extra: Map::new(),
        }
    }

    /// Build a record from one raw registry entry.
    ///
    /// `key` is the map key when the bucket is keyed by id and always wins;
    /// otherwise `id`, then `agent_id`, then `fallback_id` is used. Returns
    /// `None` for entries that are not JSON objects.
    pub fn from_json(value: &Value, key: Option<&str>, fallback_id: impl FnOnce() -> String) -> Option<Self> {
        let obj = value.as_object()?;

        let id = key
            .map(str::to_string)
            .or_else(|| entry_id(obj))
            .unwrap_or_else(fallback_id);

        let mut record = AgentRecord::new(
            id,
            obj.get("type")
                .and_then(Value::as_str)
                .unwrap_or(agent_types::UNKNOWN),
        );
        record.ip_addr = obj.get("ip_addr").and_then(scalar_string);
        record.p2p_port = obj.get("p2p_port").and_then(port);
        record.agent_rpc_port = DAEMON_PORT_KEYS.iter().find_map(|k| obj.get(*k).and_then(port));
        record.wallet_rpc_port = obj.get("wallet_rpc_port").and_then(port);
        record.wallet_address = obj.get("wallet_address").and_then(scalar_string);
        record.hash_rate = HASH_RATE_KEYS.iter().find_map(|k| obj.get(*k).and_then(number));
        record.timestamp = obj.get("timestamp").and_then(number);

        if let Some(attrs) = obj.get("attributes").and_then(Value::as_object) {
            record.attributes = attrs
                .iter()
                .map(|(k, v)| (k.clone(), AttributeValue::from(v)))
                .collect();
        }

        record.extra = obj
            .iter()
            .filter(|(k, _)| !CONSUMED_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Some(record)
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    /// Tolerant flag lookup: `attributes[name]`, else a top-level field of that name
    pub fn flag(&self, name: &str) -> bool {
        match self.attributes.get(name) {
            Some(value) => value.as_bool(),
            None => self
                .extra
                .get(name)
                .map(|v| AttributeValue::from(v).as_bool())
                .unwrap_or(false),
        }
    }

    pub fn is_type(&self, agent_type: &str) -> bool {
        self.agent_type == agent_type
    }

    /// `ip:port` of the daemon RPC endpoint, when both are known
    pub fn daemon_address(&self) -> Option<String> {
        match (&self.ip_addr, self.agent_rpc_port) {
            (Some(ip), Some(port)) => Some(format!("{}:{}", ip, port)),
            _ => None,
        }
    }
}

/// Id carried inside a raw entry: `id`, else `agent_id`, numbers as their text.
/// Reader and writer both resolve ids through this.
pub(crate) fn entry_id(entry: &Map<String, Value>) -> Option<String> {
    ID_KEYS.iter().find_map(|k| entry.get(*k).and_then(scalar_string))
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn port(value: &Value) -> Option<u16> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Availability of a public node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Available,
    Busy,
    Offline,
    /// Any status string this crate does not know about
    #[serde(other)]
    Unknown,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Available => "available",
            NodeStatus::Busy => "busy",
            NodeStatus::Offline => "offline",
            NodeStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NodeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "available" => Ok(NodeStatus::Available),
            "busy" => Ok(NodeStatus::Busy),
            "offline" => Ok(NodeStatus::Offline),
            other => Err(format!(
                "Invalid node status '{}' (expected available, busy or offline)",
                other
            )),
        }
    }
}

/// Entry of `public_nodes.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicNodeRecord {
    pub agent_id: String,
    pub ip_addr: String,
    pub rpc_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p2p_port: Option<u16>,
    pub status: NodeStatus,
    /// Unix seconds of the last status change; 0 until the node first reports
    #[serde(default)]
    pub registered_at: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Attributes>,
}

impl PublicNodeRecord {
    /// `ip:port` a wallet connects to
    pub fn address(&self) -> String {
        format!("{}:{}", self.ip_addr, self.rpc_port)
    }
}

/// `public_nodes.json` document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicNodeRegistry {
    #[serde(default)]
    pub nodes: Vec<PublicNodeRecord>,
    #[serde(default = "default_registry_version")]
    pub version: u32,
}

fn default_registry_version() -> u32 {
    1
}

impl Default for PublicNodeRegistry {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            version: default_registry_version(),
        }
    }
}
