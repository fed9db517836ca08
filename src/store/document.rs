//! Reading and atomically replacing JSON documents.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use log::debug;
use serde_json::Value;

use super::error::StoreError;

static TEMP_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Read and parse a JSON document.
///
/// Returns `Ok(None)` when the file does not exist or holds no data yet
/// (zero bytes or whitespace only). Non-empty content that is not valid JSON
/// is a [`StoreError::Parse`].
pub fn read_document(path: &Path) -> Result<Option<Value>, StoreError> {
    let content = match fs::read(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io(path, e)),
    };

    if content.iter().all(u8::is_ascii_whitespace) {
        debug!("Registry file {} is empty, treating as no data", path.display());
        return Ok(None);
    }

    // Bytes, not text: invalid UTF-8 is bad content like any other JSON error
    serde_json::from_slice(&content)
        .map(Some)
        .map_err(|source| StoreError::Parse {
            path: path.to_path_buf(),
            source,
        })
}

/// Replace `path` with `doc` so that readers observe either the old or the new
/// document, never a partial one.
///
/// The document is written to a temporary sibling in the same directory,
/// flushed to disk, then renamed over the destination.
pub fn atomic_write(path: &Path, doc: &Value) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(doc).map_err(|source| StoreError::Serialize {
        path: path.to_path_buf(),
        source,
    })?;

    let tmp_path = temp_sibling(path);
    let result = write_and_sync(&tmp_path, &bytes).and_then(|()| fs::rename(&tmp_path, path));
    if let Err(e) = result {
        let _ = fs::remove_file(&tmp_path);
        return Err(StoreError::io(path, e));
    }

    debug!("Wrote {} bytes to {}", bytes.len(), path.display());
    Ok(())
}

fn write_and_sync(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// `.agent_registry.json.<pid>.<seq>.tmp`: unique per writer, never matches `*.json`
fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "registry".to_string());
    let seq = TEMP_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    path.with_file_name(format!(".{}.{}.{}.tmp", name, std::process::id(), seq))
}
