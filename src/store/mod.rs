//! # Registry Store
//!
//! Crash-consistent, concurrency-safe access to the JSON documents shared by
//! every simulation process under the shared state directory.
//!
//! ## Guarantees
//!
//! - **Atomic visibility**: writers replace files by rename, so lock-free
//!   readers always parse a complete old or new document.
//! - **Serialized writers**: every read-modify-write runs under an advisory
//!   exclusive lock on a dedicated `<stem>.lock` sibling file.
//! - **First writer creates**: a missing document is created with its default
//!   contents under the same lock, so a racing second writer opens and merges
//!   instead of creating again.
//!
//! ## File Layout
//!
//! ```text
//! /tmp/monerosim_shared/
//! |-- agent_registry.json    # {"agents": [...]}
//! |-- agent_registry.lock    # writer lock, holds the last holder's pid
//! |-- public_nodes.json      # {"nodes": [...], "version": 1}
//! \-- public_nodes.lock
//! ```

pub mod document;
pub mod error;
pub mod lock;

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde_json::Value;

pub use document::{atomic_write, read_document};
pub use error::{LockHolder, StoreError};
pub use lock::{with_exclusive_lock, LockGuard, LockPolicy};

/// Default shared state directory used by all simulation agents
pub const DEFAULT_SHARED_DIR: &str = "/tmp/monerosim_shared";

/// Handle on the shared state directory
#[derive(Debug, Clone)]
pub struct RegistryStore {
    dir: PathBuf,
    lock_policy: LockPolicy,
}

impl RegistryStore {
    /// Open the store at `dir`, creating the directory if it does not exist
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        if !dir.is_dir() {
            fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
            info!("Created shared state directory {}", dir.display());
        }
        Ok(Self {
            dir,
            lock_policy: LockPolicy::default(),
        })
    }

    pub fn with_lock_policy(mut self, policy: LockPolicy) -> Self {
        self.lock_policy = policy;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn lock_policy(&self) -> &LockPolicy {
        &self.lock_policy
    }

    /// Path of a registry document, e.g. `agent_registry.json`
    pub fn document_path(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }

    /// Path of the dedicated lock file guarding `file_name`
    pub fn lock_path(&self, file_name: &str) -> PathBuf {
        let stem = Path::new(file_name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_name.to_string());
        self.dir.join(format!("{}.lock", stem))
    }

    /// Read a document without locking
    pub fn read(&self, file_name: &str) -> Result<Option<Value>, StoreError> {
        read_document(&self.document_path(file_name))
    }

    /// Atomically replace a document without taking its lock
    pub fn write(&self, file_name: &str, doc: &Value) -> Result<(), StoreError> {
        atomic_write(&self.document_path(file_name), doc)
    }

    /// Run `f` under the exclusive lock guarding `file_name`
    pub fn with_exclusive_lock<T, F>(&self, file_name: &str, f: F) -> Result<T, StoreError>
    where
        F: FnOnce() -> Result<T, StoreError>,
    {
        with_exclusive_lock(&self.lock_path(file_name), &self.lock_policy, f)
    }

    /// Locked read-modify-write transaction on `file_name`.
    ///
    /// A missing or empty document is first created from `default` under the
    /// lock. `f` edits the document in place; it is written back only if `f`
    /// succeeded and actually changed it.
    pub fn update<T, D, F>(&self, file_name: &str, default: D, f: F) -> Result<T, StoreError>
    where
        D: FnOnce() -> Value,
        F: FnOnce(&mut Value) -> Result<T, StoreError>,
    {
        let path = self.document_path(file_name);
        self.with_exclusive_lock(file_name, || {
            let mut doc = match read_document(&path)? {
                Some(doc) => doc,
                None => {
                    let doc = default();
                    atomic_write(&path, &doc)?;
                    debug!("Created {} with default contents", path.display());
                    doc
                }
            };

            let before = doc.clone();
            let result = f(&mut doc)?;
            if doc != before {
                atomic_write(&path, &doc)?;
            } else {
                debug!("{} unchanged, skipping write", path.display());
            }
            Ok(result)
        })
    }
}
