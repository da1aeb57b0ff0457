//! Blocking persistence helpers: advisory locks and atomic JSON writes.
//!
//! Everything here blocks; async callers go through
//! `tokio::task::spawn_blocking`.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use fs2::FileExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::types::{PluginCacheManifest, SCHEMA_VERSION};
use crate::error::{PluginError, PluginResult};

/// Take an exclusive advisory lock on `lock_path`, creating the file.
///
/// The lock is released when the returned file is dropped.
pub(crate) fn lock_exclusive(lock_path: &Path) -> PluginResult<File> {
    let lock_err = |e: std::io::Error, what: &str| PluginError::Manifest {
        path: lock_path.to_path_buf(),
        message: format!("failed to {what}: {e}"),
    };

    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| lock_err(e, "create lock file directory"))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .read(true)
        .open(lock_path)
        .map_err(|e| lock_err(e, "open lock file"))?;
    file.lock_exclusive()
        .map_err(|e| lock_err(e, "acquire exclusive file lock"))?;
    Ok(file)
}

/// Serialize `value` to `path` via a temp file, fsync and rename.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> PluginResult<()> {
    let manifest_err = |message: String| PluginError::Manifest {
        path: path.to_path_buf(),
        message,
    };

    let body = serde_json::to_vec_pretty(value)?;
    let parent = path.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(parent)
        .map_err(|e| manifest_err(format!("failed to create parent directory: {e}")))?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .map_err(|e| manifest_err(format!("failed to create temp file for atomic write: {e}")))?;
    tmp.write_all(&body)
        .map_err(|e| manifest_err(format!("failed to write temp file: {e}")))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| manifest_err(format!("failed to sync temp file to disk: {e}")))?;
    tmp.persist(path)
        .map_err(|e| manifest_err(format!("failed to atomically replace file: {e}")))?;
    Ok(())
}

/// Read and parse a JSON file. `Ok(None)` when it does not exist.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> PluginResult<Option<T>> {
    match std::fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| PluginError::Manifest {
                path: path.to_path_buf(),
                message: format!("failed to parse: {e}"),
            }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(PluginError::Manifest {
            path: path.to_path_buf(),
            message: format!("failed to read: {e}"),
        }),
    }
}

/// Load the manifest, replacing a corrupt or unreadable one with a fresh,
/// persisted empty manifest. Caller holds the exclusive lock.
pub(crate) fn load_or_recover(path: &Path) -> PluginResult<PluginCacheManifest> {
    match read_json::<PluginCacheManifest>(path) {
        Ok(Some(manifest)) => {
            if manifest.schema_version != SCHEMA_VERSION {
                warn!(
                    path = %path.display(),
                    found = manifest.schema_version,
                    expected = SCHEMA_VERSION,
                    "Cache manifest schema version mismatch, attempting best-effort load"
                );
            }
            debug!(
                path = %path.display(),
                entries = manifest.plugins.len(),
                "Loaded cache manifest"
            );
            Ok(manifest)
        },
        Ok(None) => {
            let manifest = PluginCacheManifest::new();
            write_json_atomic(path, &manifest)?;
            debug!(path = %path.display(), "Created empty cache manifest");
            Ok(manifest)
        },
        Err(e) => {
            let integrity = PluginError::CacheIntegrity {
                path: path.to_path_buf(),
                message: e.to_string(),
            };
            warn!(error = %integrity, "Replacing unreadable cache manifest with an empty one");
            let manifest = PluginCacheManifest::new();
            write_json_atomic(path, &manifest)?;
            Ok(manifest)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("value.json");
        write_json_atomic(&path, &serde_json::json!({"a": 1})).unwrap();
        let value: serde_json::Value = read_json(&path).unwrap().unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn read_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let value: Option<serde_json::Value> = read_json(&dir.path().join("absent.json")).unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn exclusive_lock_excludes_other_handles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locks").join("x.lk");
        let held = lock_exclusive(&path).unwrap();
        assert!(path.exists());

        let other = File::open(&path).unwrap();
        assert!(other.try_lock_exclusive().is_err());
        drop(held);
        assert!(other.try_lock_exclusive().is_ok());
    }

    #[test]
    fn corrupt_manifest_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache-manifest.json");
        std::fs::write(&path, "{ not json").unwrap();
        let manifest = load_or_recover(&path).unwrap();
        assert!(manifest.plugins.is_empty());
        let reread: PluginCacheManifest = read_json(&path).unwrap().unwrap();
        assert_eq!(reread.schema_version, SCHEMA_VERSION);
    }
}
