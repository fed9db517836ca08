//! Registry settings loaded from an optional YAML file.
//!
//! ```yaml
//! shared_dir: /tmp/monerosim_shared
//! cache:
//!   registry: 5s
//!   miners: 10s
//!   wallets: 10s
//!   distribution_recipients: 10s
//!   public_nodes: 5s
//! lock:
//!   timeout: 30s
//!   poll_interval: 25ms
//! selection:
//!   strategy: round_robin
//!   seed: 12345
//! ```
//!
//! Every section and field is optional; omitted values take the defaults above
//! (no lock timeout, random selection, unseeded RNG).

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::info;
use serde::{Deserialize, Serialize};

use crate::discovery::CacheTtls;
use crate::public_node::{NodeSelector, SelectionStrategy};
use crate::store::{LockPolicy, RegistryStore, StoreError, DEFAULT_SHARED_DIR};

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to open configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration file {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid shared_dir: {0}")]
    InvalidSharedDir(String),

    #[error("Invalid lock settings: {0}")]
    InvalidLock(String),
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_shared_dir")]
    pub shared_dir: PathBuf,
    #[serde(default)]
    pub cache: CacheTtls,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub selection: SelectionConfig,
}

fn default_shared_dir() -> PathBuf {
    PathBuf::from(DEFAULT_SHARED_DIR)
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            shared_dir: default_shared_dir(),
            cache: CacheTtls::default(),
            lock: LockConfig::default(),
            selection: SelectionConfig::default(),
        }
    }
}

/// Writer lock acquisition settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockConfig {
    /// Give up waiting for a writer lock after this long; unset blocks forever
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
}

fn default_poll_interval() -> Duration {
    LockPolicy::default().poll_interval
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            poll_interval: default_poll_interval(),
        }
    }
}

/// Public node selection defaults
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SelectionConfig {
    /// Strategy name; unknown names fall back to random
    #[serde(default)]
    pub strategy: Option<String>,
    /// Seed for reproducible random selection
    #[serde(default)]
    pub seed: Option<u64>,
}

impl SelectionConfig {
    pub fn strategy(&self) -> SelectionStrategy {
        self.strategy
            .as_deref()
            .map(SelectionStrategy::parse_lenient)
            .unwrap_or_default()
    }

    pub fn selector(&self) -> NodeSelector {
        match self.seed {
            Some(seed) => NodeSelector::with_seed(seed),
            None => NodeSelector::new(),
        }
    }
}

impl RegistryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shared_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidSharedDir(
                "shared_dir cannot be empty".to_string(),
            ));
        }
        if self.shared_dir.is_file() {
            return Err(ConfigError::InvalidSharedDir(format!(
                "{} exists and is not a directory",
                self.shared_dir.display()
            )));
        }
        if self.lock.poll_interval.is_zero() {
            return Err(ConfigError::InvalidLock(
                "poll_interval must be greater than zero".to_string(),
            ));
        }
        if self.lock.timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::InvalidLock(
                "timeout must be greater than zero when set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn lock_policy(&self) -> LockPolicy {
        LockPolicy {
            timeout: self.lock.timeout,
            poll_interval: self.lock.poll_interval,
        }
    }

    /// Open the shared directory with the configured lock policy
    pub fn open_store(&self) -> Result<RegistryStore, StoreError> {
        Ok(RegistryStore::open(&self.shared_dir)?.with_lock_policy(self.lock_policy()))
    }
}

/// Load and validate configuration from a YAML file
pub fn load_config(config_path: &Path) -> Result<RegistryConfig, ConfigError> {
    info!("Loading configuration from: {:?}", config_path);

    let file = File::open(config_path).map_err(|source| ConfigError::Io {
        path: config_path.to_path_buf(),
        source,
    })?;
    let config: RegistryConfig = serde_yaml::from_reader(file).map_err(|source| ConfigError::Yaml {
        path: config_path.to_path_buf(),
        source,
    })?;

    config.validate()?;
    Ok(config)
}
