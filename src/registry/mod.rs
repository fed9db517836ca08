//! # Agent Registry
//!
//! Record types for the JSON registry files shared by every agent in a
//! simulation, and the writer agents use to register themselves.
//!
//! ## Registry Files
//!
//! **Agent Registry** (`agent_registry.json`):
//! - One entry per agent, keyed by `id`
//! - IP address, daemon/wallet RPC ports, attributes, wallet address
//! - Seeded by the config generator, then upserted by each agent at startup
//!
//! **Miner Registry** (`miners.json`):
//! - Legacy mining view (`agent_id`, `ip_addr`, `weight`), no ports
//! - Joined back to the agent registry on `ip_addr`
//!
//! **Public Node Registry** (`public_nodes.json`):
//! - Daemons opted in with `is_public_node`, plus their availability status
//!
//! ## Example Entry
//!
//! ```json
//! {
//!   "agents": [
//!     {
//!       "id": "user000",
//!       "type": "miner",
//!       "ip_addr": "10.0.0.10",
//!       "agent_rpc_port": 28081,
//!       "wallet_rpc_port": 28082,
//!       "attributes": { "is_miner": "true", "hashrate": "25" },
//!       "timestamp": 946684805.0
//!     }
//!   ]
//! }
//! ```

pub mod types;
pub mod writer;

pub use types::{
    agent_types, parse_bool, unix_now, AgentRecord, AttributeValue, Attributes, NodeStatus,
    PublicNodeRecord, PublicNodeRegistry,
};
pub use writer::{Registration, RegistrationOutcome, RegistrationWriter};

pub const AGENT_REGISTRY_FILE: &str = "agent_registry.json";
pub const MINERS_FILE: &str = "miners.json";
pub const WALLETS_FILE: &str = "wallets.json";
pub const BLOCK_CONTROLLER_FILE: &str = "block_controller.json";
pub const PUBLIC_NODES_FILE: &str = "public_nodes.json";

/// Top-level key holding the entries of `agent_registry.json`
pub const AGENTS_KEY: &str = "agents";
