//! Public node selection strategies.

use std::fmt;
use std::str::FromStr;

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::discovery::{AgentDiscovery, DiscoveryError};
use crate::registry::{NodeStatus, PublicNodeRecord};

/// How a wallet picks among available public nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    #[default]
    Random,
    First,
    RoundRobin,
}

impl SelectionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionStrategy::Random => "random",
            SelectionStrategy::First => "first",
            SelectionStrategy::RoundRobin => "round_robin",
        }
    }

    /// Parse a strategy name, falling back to `Random` with a warning
    pub fn parse_lenient(name: &str) -> Self {
        name.parse().unwrap_or_else(|e| {
            warn!("{}, using random", e);
            SelectionStrategy::Random
        })
    }
}

impl fmt::Display for SelectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SelectionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "random" => Ok(SelectionStrategy::Random),
            "first" => Ok(SelectionStrategy::First),
            "round_robin" | "roundrobin" => Ok(SelectionStrategy::RoundRobin),
            other => Err(format!("Unknown selection strategy '{}'", other)),
        }
    }
}

/// Picks one node address per call.
///
/// The round-robin position is per selector and never resets; when the
/// candidate list changes between calls it continues from the same counter
/// modulo the new length.
#[derive(Debug)]
pub struct NodeSelector {
    counter: u64,
    rng: StdRng,
}

impl Default for NodeSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeSelector {
    pub fn new() -> Self {
        Self {
            counter: 0,
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic random selection, for reproducible simulations
    pub fn with_seed(seed: u64) -> Self {
        Self {
            counter: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Select an `ip:port` from `candidates`, skipping any whose agent id is in `exclude_ids`.
    ///
    /// Returns `None` when nothing is left to choose from.
    pub fn select(
        &mut self,
        candidates: &[PublicNodeRecord],
        strategy: SelectionStrategy,
        exclude_ids: &[&str],
    ) -> Option<String> {
        let eligible: Vec<&PublicNodeRecord> = candidates
            .iter()
            .filter(|node| !exclude_ids.contains(&node.agent_id.as_str()))
            .collect();

        if eligible.is_empty() {
            warn!("No eligible public nodes to select from");
            return None;
        }

        let chosen = match strategy {
            SelectionStrategy::First => eligible[0],
            SelectionStrategy::RoundRobin => {
                let idx = (self.counter % eligible.len() as u64) as usize;
                self.counter = self.counter.wrapping_add(1);
                eligible[idx]
            }
            SelectionStrategy::Random => eligible.choose(&mut self.rng).copied()?,
        };

        let address = chosen.address();
        debug!(
            "Selected public node {} at {} using {} strategy",
            chosen.agent_id, address, strategy
        );
        Some(address)
    }

    /// Select among the `available` nodes currently registered
    pub fn select_public_node(
        &mut self,
        discovery: &mut AgentDiscovery,
        strategy: SelectionStrategy,
        exclude_ids: &[&str],
    ) -> Result<Option<String>, DiscoveryError> {
        let available = discovery.get_public_nodes(Some(NodeStatus::Available), false)?;
        if available.is_empty() {
            info!("No available public nodes registered");
            return Ok(None);
        }
        Ok(self.select(&available, strategy, exclude_ids))
    }
}
