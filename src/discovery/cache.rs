//! Per-query TTL caches.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Staleness tolerated for each query shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheTtls {
    #[serde(default = "default_registry_ttl", with = "humantime_serde")]
    pub registry: Duration,
    #[serde(default = "default_miners_ttl", with = "humantime_serde")]
    pub miners: Duration,
    #[serde(default = "default_wallets_ttl", with = "humantime_serde")]
    pub wallets: Duration,
    #[serde(default = "default_distribution_ttl", with = "humantime_serde")]
    pub distribution_recipients: Duration,
    #[serde(default = "default_public_nodes_ttl", with = "humantime_serde")]
    pub public_nodes: Duration,
}

fn default_registry_ttl() -> Duration {
    Duration::from_secs(5)
}

fn default_miners_ttl() -> Duration {
    Duration::from_secs(10)
}

fn default_wallets_ttl() -> Duration {
    Duration::from_secs(10)
}

fn default_distribution_ttl() -> Duration {
    Duration::from_secs(10)
}

fn default_public_nodes_ttl() -> Duration {
    Duration::from_secs(5)
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            registry: default_registry_ttl(),
            miners: default_miners_ttl(),
            wallets: default_wallets_ttl(),
            distribution_recipients: default_distribution_ttl(),
            public_nodes: default_public_nodes_ttl(),
        }
    }
}

impl CacheTtls {
    /// Same TTL for every query shape
    pub fn uniform(ttl: Duration) -> Self {
        Self {
            registry: ttl,
            miners: ttl,
            wallets: ttl,
            distribution_recipients: ttl,
            public_nodes: ttl,
        }
    }
}

/// A single cached value and when it was stored
#[derive(Debug)]
pub struct TtlCache<T> {
    entry: Option<(T, Instant)>,
    ttl: Duration,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self { entry: None, ttl }
    }

    /// The cached value, if present and younger than the TTL
    pub fn get(&self) -> Option<T> {
        match &self.entry {
            Some((value, stored_at)) if stored_at.elapsed() < self.ttl => Some(value.clone()),
            _ => None,
        }
    }

    pub fn put(&mut self, value: T) {
        self.entry = Some((value, Instant::now()));
    }

    pub fn invalidate(&mut self) {
        self.entry = None;
    }

    pub fn age(&self) -> Option<Duration> {
        self.entry.as_ref().map(|(_, stored_at)| stored_at.elapsed())
    }

    pub fn is_valid(&self) -> bool {
        self.age().is_some_and(|age| age < self.ttl)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}
