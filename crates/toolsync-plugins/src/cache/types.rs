//! On-disk cache records.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Current manifest schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// File name of the manifest at the cache root.
pub const MANIFEST_FILE: &str = "cache-manifest.json";

/// File name of the per-plugin sidecar.
pub const METADATA_FILE: &str = ".plugin-cache-meta.json";

/// Reserved user-writable directory preserved across updates.
pub const LOCAL_OVERRIDES_DIR: &str = ".local-overrides";

/// The index of every cached plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginCacheManifest {
    /// Schema version for forward compatibility.
    pub schema_version: u32,
    /// Entries keyed by plugin id.
    #[serde(default)]
    pub plugins: BTreeMap<String, PluginCacheEntry>,
    /// Last time any entry changed.
    pub last_updated: DateTime<Utc>,
}

impl PluginCacheManifest {
    /// An empty manifest stamped with the current time.
    #[must_use]
    pub fn new() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            plugins: BTreeMap::new(),
            last_updated: Utc::now(),
        }
    }

    /// Bump `last_updated`.
    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }
}

impl Default for PluginCacheManifest {
    fn default() -> Self {
        Self::new()
    }
}

/// One cached plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginCacheEntry {
    /// Plugin id (also the directory name).
    pub id: String,
    /// Source specifier the plugin was fetched from.
    pub source: String,
    /// Pinned version, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// When the entry was written.
    pub cached_at: DateTime<Utc>,
    /// Content directory.
    pub path: PathBuf,
    /// Short SHA-256 of the fetched bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

/// Per-plugin sidecar stored next to the content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginCacheMetadata {
    /// Plugin id.
    pub id: String,
    /// Source specifier.
    pub source: String,
    /// Pinned version, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// When the plugin was cached.
    pub cached_at: DateTime<Utc>,
    /// Last time the plugin was read from the cache.
    pub last_accessed: DateTime<Utc>,
    /// Short SHA-256 of the fetched bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    /// Descriptor read from the plugin's own `plugin.json`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<PluginManifestInfo>,
}

/// Caller-supplied extras for [`PluginCache::cache_plugin`](super::PluginCache::cache_plugin).
#[derive(Debug, Clone, Default)]
pub struct CacheMetadata {
    /// Short SHA-256 of the fetched bytes.
    pub content_hash: Option<String>,
    /// Plugin descriptor. Read from the content directory when `None`.
    pub manifest: Option<PluginManifestInfo>,
}

/// Author field of a `plugin.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PluginAuthor {
    /// `"author": "Jane Doe"`
    Name(String),
    /// `"author": {"name": "...", "email": "..."}`
    Detailed {
        /// Author name.
        name: String,
        /// Contact email.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        email: Option<String>,
        /// Homepage.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
}

impl PluginAuthor {
    /// The author's display name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Name(name) | Self::Detailed { name, .. } => name,
        }
    }
}

/// The subset of a plugin's `plugin.json` worth keeping in the sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifestInfo {
    /// Plugin name.
    pub name: String,
    /// Declared version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Short description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Author.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<PluginAuthor>,
}

impl PluginManifestInfo {
    /// Candidate descriptor locations, in lookup order.
    pub const CANDIDATES: [&'static str; 2] = ["plugin.json", ".claude-plugin/plugin.json"];

    /// Read the first parseable descriptor under `dir`.
    #[must_use]
    pub fn read(dir: &Path) -> Option<Self> {
        Self::CANDIDATES.iter().find_map(|candidate| {
            let path = dir.join(candidate);
            let content = std::fs::read_to_string(&path).ok()?;
            match serde_json::from_str(&content) {
                Ok(info) => Some(info),
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "ignoring unparseable plugin.json");
                    None
                },
            }
        })
    }
}

/// Outcome of [`PluginCache::reconcile`](super::PluginCache::reconcile).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    /// Manifest entries dropped because their directory is gone.
    pub removed_entries: Vec<String>,
    /// Directories under the cache root with no manifest entry.
    pub orphan_dirs: Vec<PathBuf>,
}

impl ReconcileReport {
    /// Whether manifest and filesystem already agreed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.removed_entries.is_empty() && self.orphan_dirs.is_empty()
    }
}
