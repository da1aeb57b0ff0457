//! Plugin cache manager.
//!
//! Layout under the cache root:
//!
//! ```text
//! cache-manifest.json          index of every cached plugin
//! cache-manifest.lk            advisory lock for manifest read-modify-write
//! <plugin-id>/                 fetched content
//! <plugin-id>/.plugin-cache-meta.json
//! <plugin-id>/.local-overrides/
//! ```
//!
//! A plugin counts as cached only when both its manifest entry and its
//! directory exist. [`PluginCache::reconcile`] repairs drift between the two.

pub mod id;
pub(crate) mod store;
pub mod types;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub use self::id::{content_hash, generate_plugin_id};
use self::store::{load_or_recover, lock_exclusive, read_json, write_json_atomic};
pub use self::types::{
    CacheMetadata, LOCAL_OVERRIDES_DIR, MANIFEST_FILE, METADATA_FILE, PluginAuthor,
    PluginCacheEntry, PluginCacheManifest, PluginCacheMetadata, PluginManifestInfo,
    ReconcileReport,
};
use crate::error::{PluginError, PluginResult};
use crate::source::strip_ref;

/// Durable index of cached plugins.
///
/// Every mutation re-reads the manifest from disk under an exclusive lock,
/// applies the change and persists it atomically, so a second process
/// never loses entries. Reads use the in-memory snapshot.
#[derive(Debug)]
pub struct PluginCache {
    root: PathBuf,
    manifest: RwLock<PluginCacheManifest>,
}

impl PluginCache {
    /// Create a cache handle rooted at `root`. No I/O until [`init`](Self::init).
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            manifest: RwLock::new(PluginCacheManifest::new()),
        }
    }

    /// Create and initialise a shared cache handle.
    ///
    /// # Errors
    ///
    /// See [`init`](Self::init).
    pub async fn open(root: impl Into<PathBuf>) -> PluginResult<Arc<Self>> {
        let cache = Self::new(root);
        cache.init().await?;
        Ok(Arc::new(cache))
    }

    /// Ensure the root exists and load (or create) the manifest.
    ///
    /// A corrupt manifest is replaced by an empty one rather than failing.
    ///
    /// # Errors
    ///
    /// Returns an error if the root cannot be created or the manifest cannot
    /// be written.
    pub async fn init(&self) -> PluginResult<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        let manifest_path = self.manifest_path();
        let lock_path = self.lock_path();
        let manifest = tokio::task::spawn_blocking(move || {
            let _guard = lock_exclusive(&lock_path)?;
            load_or_recover(&manifest_path)
        })
        .await
        .map_err(join_err)??;

        debug!(root = %self.root.display(), entries = manifest.plugins.len(), "Plugin cache ready");
        *self.manifest.write().await = manifest;
        Ok(())
    }

    /// The cache root directory.
    #[must_use]
    pub fn cache_root(&self) -> &Path {
        &self.root
    }

    /// The content directory for `plugin_id`.
    #[must_use]
    pub fn plugin_path(&self, plugin_id: &str) -> PathBuf {
        self.root.join(plugin_id)
    }

    /// Whether `source` at `version` has both a manifest entry and a directory.
    pub async fn is_cached(&self, source: &str, version: Option<&str>) -> bool {
        match self.get_cache_entry(source, version).await {
            Some(entry) => tokio::fs::try_exists(&entry.path).await.unwrap_or(false),
            None => false,
        }
    }

    /// The manifest entry for `source` at `version`.
    ///
    /// When `version` is given the entry's recorded version must match it
    /// exactly.
    pub async fn get_cache_entry(
        &self,
        source: &str,
        version: Option<&str>,
    ) -> Option<PluginCacheEntry> {
        let id = generate_plugin_id(source, version);
        let manifest = self.manifest.read().await;
        let entry = manifest.plugins.get(&id)?;
        match version {
            Some(v) if entry.version.as_deref() != Some(v) => None,
            _ => Some(entry.clone()),
        }
    }

    /// Record `path` as the cached content for `source` at `version`.
    ///
    /// Upserts the manifest entry, writes the sidecar and bumps the
    /// manifest's `lastUpdated`.
    ///
    /// # Errors
    ///
    /// Returns an error if the sidecar or manifest cannot be written.
    pub async fn cache_plugin(
        &self,
        source: &str,
        version: Option<&str>,
        path: &Path,
        metadata: Option<CacheMetadata>,
    ) -> PluginResult<PluginCacheEntry> {
        let id = generate_plugin_id(source, version);
        let now = Utc::now();
        let metadata = metadata.unwrap_or_default();

        let entry = PluginCacheEntry {
            id: id.clone(),
            source: source.to_owned(),
            version: version.map(str::to_owned),
            cached_at: now,
            path: path.to_path_buf(),
            content_hash: metadata.content_hash.clone(),
        };

        let sidecar_dir = path.to_path_buf();
        let sidecar_entry = entry.clone();
        tokio::task::spawn_blocking(move || {
            let manifest = metadata
                .manifest
                .or_else(|| PluginManifestInfo::read(&sidecar_dir));
            let sidecar = PluginCacheMetadata {
                id: sidecar_entry.id,
                source: sidecar_entry.source,
                version: sidecar_entry.version,
                cached_at: now,
                last_accessed: now,
                content_hash: sidecar_entry.content_hash,
                manifest,
            };
            write_json_atomic(&sidecar_dir.join(METADATA_FILE), &sidecar)
        })
        .await
        .map_err(join_err)??;

        let stored = entry.clone();
        self.mutate(move |m| {
            m.plugins.insert(stored.id.clone(), stored);
        })
        .await?;

        info!(plugin_id = %id, path = %path.display(), "Cached plugin");
        Ok(entry)
    }

    /// Remove the entry and directory for `source` at `version`.
    ///
    /// A missing directory is not an error. Returns whether an entry existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be removed, or the
    /// manifest cannot be written.
    pub async fn invalidate(&self, source: &str, version: Option<&str>) -> PluginResult<bool> {
        let id = generate_plugin_id(source, version);
        let removed = self.detach_entry(&id).await?;
        let dir = removed
            .as_ref()
            .map_or_else(|| self.plugin_path(&id), |e| e.path.clone());
        remove_dir_tolerant(&dir).await?;

        if removed.is_some() {
            info!(plugin_id = %id, "Invalidated cached plugin");
        }
        Ok(removed.is_some())
    }

    /// Reset the manifest and delete every directory under the cache root.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory cannot be removed or the manifest
    /// cannot be written.
    pub async fn clear_all(&self) -> PluginResult<usize> {
        self.mutate(|m| {
            m.plugins.clear();
        })
        .await?;

        let mut removed: usize = 0;
        let mut dir = tokio::fs::read_dir(&self.root).await?;
        while let Some(child) = dir.next_entry().await? {
            if child.file_type().await?.is_dir() {
                tokio::fs::remove_dir_all(child.path()).await?;
                removed = removed.saturating_add(1);
            }
        }

        info!(root = %self.root.display(), removed, "Cleared plugin cache");
        Ok(removed)
    }

    /// Every manifest entry, ordered by id.
    pub async fn list_cached(&self) -> Vec<PluginCacheEntry> {
        self.manifest.read().await.plugins.values().cloned().collect()
    }

    /// Entries whose source matches `source` once any `#ref` is removed.
    pub async fn find_by_source(&self, source: &str) -> Vec<PluginCacheEntry> {
        let base = strip_ref(source);
        self.manifest
            .read()
            .await
            .plugins
            .values()
            .filter(|e| strip_ref(&e.source) == base)
            .cloned()
            .collect()
    }

    /// Bump `lastAccessed` in the sidecar. Failures are logged and ignored.
    pub async fn touch_plugin(&self, plugin_id: &str) {
        let path = self.plugin_path(plugin_id).join(METADATA_FILE);
        let result = tokio::task::spawn_blocking(move || -> PluginResult<()> {
            let Some(mut meta) = read_json::<PluginCacheMetadata>(&path)? else {
                return Ok(());
            };
            meta.last_accessed = Utc::now();
            write_json_atomic(&path, &meta)
        })
        .await;

        match result {
            Ok(Ok(())) => {},
            Ok(Err(e)) => debug!(plugin_id, error = %e, "Failed to touch plugin metadata"),
            Err(e) => debug!(plugin_id, error = %e, "Touch task failed"),
        }
    }

    /// Read the sidecar for `plugin_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the sidecar exists but cannot be parsed.
    pub async fn read_metadata(
        &self,
        plugin_id: &str,
    ) -> PluginResult<Option<PluginCacheMetadata>> {
        let path = self.plugin_path(plugin_id).join(METADATA_FILE);
        tokio::task::spawn_blocking(move || read_json(&path))
            .await
            .map_err(join_err)?
    }

    /// Drop entries whose directory is gone and report unindexed directories.
    ///
    /// Hidden directories (update scratch space) are not reported as orphans.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache root cannot be listed or the manifest
    /// cannot be written.
    pub async fn reconcile(&self) -> PluginResult<ReconcileReport> {
        let mut missing = Vec::new();
        for entry in self.list_cached().await {
            if !tokio::fs::try_exists(&entry.path).await.unwrap_or(false) {
                missing.push(entry.id);
            }
        }

        let removed_entries = if missing.is_empty() {
            Vec::new()
        } else {
            self.mutate(move |m| {
                missing
                    .into_iter()
                    .filter(|id| m.plugins.remove(id).is_some())
                    .collect::<Vec<_>>()
            })
            .await?
        };
        for id in &removed_entries {
            warn!(plugin_id = %id, "Dropped cache entry whose directory is missing");
        }

        let known: Vec<PathBuf> = self.list_cached().await.into_iter().map(|e| e.path).collect();
        let mut orphan_dirs = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.root).await?;
        while let Some(child) = dir.next_entry().await? {
            let hidden = child.file_name().to_string_lossy().starts_with('.');
            if hidden || !child.file_type().await?.is_dir() {
                continue;
            }
            let path = child.path();
            if !known.contains(&path) {
                orphan_dirs.push(path);
            }
        }
        orphan_dirs.sort();

        Ok(ReconcileReport {
            removed_entries,
            orphan_dirs,
        })
    }

    /// Total bytes of regular files under the cache root.
    pub async fn disk_usage(&self) -> u64 {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || {
            walkdir::WalkDir::new(root)
                .follow_links(false)
                .into_iter()
                .filter_map(Result::ok)
                .filter_map(|e| e.metadata().ok())
                .filter(std::fs::Metadata::is_file)
                .fold(0_u64, |acc, m| acc.saturating_add(m.len()))
        })
        .await
        .unwrap_or(0)
    }

    /// Remove and return the entry for `plugin_id` without touching its
    /// directory.
    pub(crate) async fn detach_entry(
        &self,
        plugin_id: &str,
    ) -> PluginResult<Option<PluginCacheEntry>> {
        let id = plugin_id.to_owned();
        self.mutate(move |m| m.plugins.remove(&id)).await
    }

    /// Put a previously detached entry back.
    pub(crate) async fn restore_entry(&self, entry: PluginCacheEntry) -> PluginResult<()> {
        self.mutate(move |m| {
            m.plugins.insert(entry.id.clone(), entry);
        })
        .await
    }

    /// Read-modify-write the on-disk manifest under the exclusive lock and
    /// refresh the snapshot.
    async fn mutate<F, R>(&self, f: F) -> PluginResult<R>
    where
        F: FnOnce(&mut PluginCacheManifest) -> R + Send + 'static,
        R: Send + 'static,
    {
        let manifest_path = self.manifest_path();
        let lock_path = self.lock_path();
        let mut snapshot = self.manifest.write().await;
        let (manifest, out) = tokio::task::spawn_blocking(move || -> PluginResult<_> {
            let _guard = lock_exclusive(&lock_path)?;
            let mut manifest = load_or_recover(&manifest_path)?;
            let out = f(&mut manifest);
            manifest.touch();
            write_json_atomic(&manifest_path, &manifest)?;
            debug!(
                path = %manifest_path.display(),
                entries = manifest.plugins.len(),
                "Saved cache manifest"
            );
            Ok((manifest, out))
        })
        .await
        .map_err(join_err)??;
        *snapshot = manifest;
        Ok(out)
    }

    fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    fn lock_path(&self) -> PathBuf {
        self.manifest_path().with_extension("lk")
    }
}

/// Remove a directory tree, treating "already gone" as success.
pub(crate) async fn remove_dir_tolerant(path: &Path) -> PluginResult<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn join_err(e: tokio::task::JoinError) -> PluginError {
    PluginError::Io(std::io::Error::other(format!("blocking task failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn fresh() -> (tempfile::TempDir, Arc<PluginCache>) {
        let dir = tempfile::tempdir().unwrap();
        let cache = PluginCache::open(dir.path().join("plugins")).await.unwrap();
        (dir, cache)
    }

    async fn seed(cache: &PluginCache, source: &str, version: Option<&str>) -> PathBuf {
        let id = generate_plugin_id(source, version);
        let path = cache.plugin_path(&id);
        tokio::fs::create_dir_all(path.join("rules")).await.unwrap();
        tokio::fs::write(path.join("rules/a.md"), "# a").await.unwrap();
        cache.cache_plugin(source, version, &path, None).await.unwrap();
        path
    }

    #[tokio::test]
    async fn init_creates_manifest() {
        let (_dir, cache) = fresh().await;
        assert!(cache.cache_root().join(MANIFEST_FILE).exists());
        assert!(cache.list_cached().await.is_empty());
    }

    #[tokio::test]
    async fn init_recovers_from_corrupt_manifest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE), "garbage").unwrap();
        let cache = PluginCache::open(dir.path()).await.unwrap();
        assert!(cache.list_cached().await.is_empty());
        let raw = std::fs::read_to_string(dir.path().join(MANIFEST_FILE)).unwrap();
        assert!(raw.contains("schemaVersion"));
    }

    #[tokio::test]
    async fn cache_then_invalidate_round_trip() {
        let (_dir, cache) = fresh().await;
        let source = "github:acme/rules";
        let path = seed(&cache, source, Some("v1.0.0")).await;

        assert!(cache.is_cached(source, Some("v1.0.0")).await);
        assert!(path.join(METADATA_FILE).exists());

        assert!(cache.invalidate(source, Some("v1.0.0")).await.unwrap());
        assert!(!cache.is_cached(source, Some("v1.0.0")).await);
        assert!(!path.exists());

        // Second invalidate tolerates the missing directory.
        assert!(!cache.invalidate(source, Some("v1.0.0")).await.unwrap());
    }

    #[tokio::test]
    async fn pinned_version_requires_exact_match() {
        let (_dir, cache) = fresh().await;
        let path = cache.plugin_path("acme_rules");
        tokio::fs::create_dir_all(&path).await.unwrap();
        cache
            .cache_plugin("github:acme/rules", None, &path, None)
            .await
            .unwrap();

        assert!(cache.is_cached("github:acme/rules", None).await);
        assert!(cache.get_cache_entry("github:acme/rules", Some("v1")).await.is_none());
    }

    #[tokio::test]
    async fn entry_without_directory_is_not_cached() {
        let (_dir, cache) = fresh().await;
        let path = seed(&cache, "github:acme/rules", None).await;
        tokio::fs::remove_dir_all(&path).await.unwrap();
        assert!(cache.get_cache_entry("github:acme/rules", None).await.is_some());
        assert!(!cache.is_cached("github:acme/rules", None).await);
    }

    #[tokio::test]
    async fn manifest_survives_reopen() {
        let (dir, cache) = fresh().await;
        seed(&cache, "github:acme/rules", Some("v1.0.0")).await;
        drop(cache);

        let reopened = PluginCache::open(dir.path().join("plugins")).await.unwrap();
        let entries = reopened.list_cached().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "acme_rules_v1.0.0");
        assert_eq!(entries[0].version.as_deref(), Some("v1.0.0"));
    }

    #[tokio::test]
    async fn sidecar_reads_plugin_json() {
        let (_dir, cache) = fresh().await;
        let path = cache.plugin_path("acme_rules");
        tokio::fs::create_dir_all(path.join(".claude-plugin")).await.unwrap();
        tokio::fs::write(
            path.join(".claude-plugin/plugin.json"),
            r#"{"name":"acme-rules","version":"1.0.0","author":{"name":"Acme"}}"#,
        )
        .await
        .unwrap();
        cache
            .cache_plugin("github:acme/rules", None, &path, None)
            .await
            .unwrap();

        let meta = cache.read_metadata("acme_rules").await.unwrap().unwrap();
        let info = meta.manifest.unwrap();
        assert_eq!(info.name, "acme-rules");
        assert_eq!(info.author.unwrap().name(), "Acme");
    }

    #[tokio::test]
    async fn touch_bumps_last_accessed() {
        let (_dir, cache) = fresh().await;
        seed(&cache, "github:acme/rules", None).await;
        let before = cache.read_metadata("acme_rules").await.unwrap().unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        cache.touch_plugin("acme_rules").await;
        let after = cache.read_metadata("acme_rules").await.unwrap().unwrap();
        assert!(after.last_accessed > before.last_accessed);

        // Unknown ids are ignored.
        cache.touch_plugin("does_not_exist").await;
    }

    #[tokio::test]
    async fn find_by_source_ignores_ref() {
        let (_dir, cache) = fresh().await;
        seed(&cache, "github:acme/rules#v1.0.0", Some("v1.0.0")).await;
        seed(&cache, "github:acme/rules#v2.0.0", Some("v2.0.0")).await;
        seed(&cache, "github:acme/other", None).await;
        assert_eq!(cache.find_by_source("github:acme/rules").await.len(), 2);
    }

    #[tokio::test]
    async fn clear_all_removes_everything() {
        let (_dir, cache) = fresh().await;
        let a = seed(&cache, "github:acme/rules", None).await;
        let b = seed(&cache, "github:acme/other", None).await;
        assert_eq!(cache.clear_all().await.unwrap(), 2);
        assert!(cache.list_cached().await.is_empty());
        assert!(!a.exists() && !b.exists());
        assert!(cache.cache_root().join(MANIFEST_FILE).exists());
    }

    #[tokio::test]
    async fn reconcile_drops_stale_entries_and_reports_orphans() {
        let (_dir, cache) = fresh().await;
        let stale = seed(&cache, "github:acme/rules", None).await;
        seed(&cache, "github:acme/other", None).await;
        tokio::fs::remove_dir_all(&stale).await.unwrap();
        let orphan = cache.plugin_path("stray");
        tokio::fs::create_dir_all(&orphan).await.unwrap();
        tokio::fs::create_dir_all(cache.cache_root().join(".scratch")).await.unwrap();

        let report = cache.reconcile().await.unwrap();
        assert_eq!(report.removed_entries, vec!["acme_rules".to_string()]);
        assert_eq!(report.orphan_dirs, vec![orphan]);
        assert_eq!(cache.list_cached().await.len(), 1);

        let again = cache.reconcile().await.unwrap();
        assert!(again.removed_entries.is_empty());
    }

    #[tokio::test]
    async fn detach_and_restore_entry() {
        let (_dir, cache) = fresh().await;
        seed(&cache, "github:acme/rules", None).await;
        let entry = cache.detach_entry("acme_rules").await.unwrap().unwrap();
        assert!(cache.list_cached().await.is_empty());
        cache.restore_entry(entry).await.unwrap();
        assert!(cache.is_cached("github:acme/rules", None).await);
    }
}
