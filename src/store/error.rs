//! Errors raised by the registry store.

use std::path::PathBuf;
use std::time::Duration;

/// Errors that can occur while reading, writing or locking registry files
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in registry file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize registry document for {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Timed out after {waited:?} waiting for lock {path} ({})", describe_holder(.holder))]
    LockTimeout {
        path: PathBuf,
        waited: Duration,
        holder: Option<LockHolder>,
    },

    #[error("Unexpected document layout in {path}: {reason}")]
    Layout { path: PathBuf, reason: String },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns true if this error came from malformed file content rather than the environment
    pub fn is_parse_error(&self) -> bool {
        matches!(self, StoreError::Parse { .. })
    }
}

/// Last process recorded as holding a lock file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockHolder {
    pub pid: u32,
    pub alive: bool,
}

fn describe_holder(holder: &Option<LockHolder>) -> String {
    match holder {
        Some(LockHolder { pid, alive: true }) => format!("held by live process {}", pid),
        Some(LockHolder { pid, alive: false }) => {
            format!("last holder {} is gone, lock owner unknown", pid)
        }
        None => "holder unknown".to_string(),
    }
}
