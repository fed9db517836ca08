//! # Monerosim Registry - Agent registration and discovery for Monero network simulations
//!
//! This library lets the independently launched processes of a Shadow
//! simulation (miners, wallet users, block controllers, public nodes) register
//! themselves and find each other through nothing more than a shared directory
//! of JSON files.
//!
//! ## Overview
//!
//! Every agent writes its own record once at startup and reads everybody
//! else's repeatedly during the run. There is no coordinator process: writers
//! serialize on advisory file locks, readers never lock and rely on atomic
//! file replacement, and each reader keeps short-lived caches of what it found.
//!
//! ## Key Features
//!
//! - **Concurrency-safe upserts**: locked read-modify-write across OS processes
//! - **Crash-consistent files**: readers see a complete old or new document, never a torn one
//! - **Schema drift tolerance**: list and map layouts, legacy field names, `"true"`/`true`/`1` flags
//! - **Layered discovery**: type, then attribute flag, then legacy per-role files
//! - **Peer selection**: random, first or round-robin choice of public nodes
//!
//! ## Architecture
//!
//! - `store`: atomic document writes and exclusive lock files
//! - `registry`: record types and the self-registration writer
//! - `discovery`: cached, aggregated views over all registry files
//! - `public_node`: node selection and status updates in `public_nodes.json`
//! - `config`: YAML settings for the shared directory, cache TTLs and lock policy
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use monerosim_registry::discovery::AgentDiscovery;
//! use monerosim_registry::public_node::{NodeSelector, SelectionStrategy};
//! use monerosim_registry::registry::{Registration, RegistrationWriter};
//! use monerosim_registry::store::RegistryStore;
//!
//! let store = RegistryStore::open("/tmp/monerosim_shared")?;
//!
//! // Register this agent
//! let writer = RegistrationWriter::new(store.clone());
//! writer.register(
//!     &Registration::new("user003")
//!         .agent_type("user")
//!         .ip_addr("10.0.0.13")
//!         .wallet_rpc_port(28082)
//!         .attribute("can_receive_distributions", true),
//! )?;
//!
//! // Find peers
//! let mut discovery = AgentDiscovery::new(store.dir())?;
//! let miners = discovery.get_miners(false)?;
//!
//! // Pick a remote daemon for this wallet
//! let mut selector = NodeSelector::new();
//! let node = selector.select_public_node(&mut discovery, SelectionStrategy::RoundRobin, &["user003"])?;
//! # let _ = (miners, node);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Error Handling
//!
//! Each module has its own `thiserror` error type (`StoreError`,
//! `DiscoveryError`, `ConfigError`). Registration and status updates also come
//! in degrading variants that log the failure and return `false`, so an agent
//! can keep running undiscoverable instead of exiting.

pub mod config;
pub mod discovery;
pub mod public_node;
pub mod registry;
pub mod store;
