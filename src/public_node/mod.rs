//! # Public Nodes
//!
//! Daemons that accept RPC connections from wallets of other agents are listed
//! in `public_nodes.json` with an availability status. Wallet agents pick one
//! with a [`NodeSelector`]; node agents report their own status through a
//! [`StatusUpdater`].
//!
//! ```json
//! {
//!   "nodes": [
//!     {
//!       "agent_id": "user003",
//!       "ip_addr": "10.0.0.13",
//!       "rpc_port": 18081,
//!       "p2p_port": 18080,
//!       "status": "available",
//!       "registered_at": 0.0
//!     }
//!   ],
//!   "version": 1
//! }
//! ```

pub mod selector;
pub mod status;

pub use selector::{NodeSelector, SelectionStrategy};
pub use status::{StatusUpdater, DEFAULT_P2P_PORT, DEFAULT_RPC_PORT, IS_PUBLIC_NODE_ATTR};
