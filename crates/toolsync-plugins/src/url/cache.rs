//! Two-tier cache for URL fetches.
//!
//! Memory is a `DashMap` keyed by URL. The optional disk tier stores one JSON
//! file per URL at `<dir>/<host>/<sha256(url)>.json` so entries survive
//! restarts. Disk failures are logged and never fail a fetch.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::cache::join_err;
use crate::cache::store::{read_json, write_json_atomic};
use crate::error::PluginResult;

/// Default freshness window for URL content.
pub const DEFAULT_URL_TTL: Duration = Duration::from_secs(3600);

/// One cached response body with its validators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlCacheEntry {
    /// Response body.
    pub content: String,
    /// When the body was fetched or last revalidated.
    pub fetched_at: DateTime<Utc>,
    /// `ETag` response header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// `Last-Modified` response header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
}

/// Which tier answered a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    /// In-process map.
    Memory,
    /// On-disk JSON file.
    Disk,
}

/// Owned URL cache. Cheap to share behind an `Arc`.
#[derive(Debug)]
pub struct UrlCache {
    memory: DashMap<String, UrlCacheEntry>,
    disk_dir: Option<PathBuf>,
    ttl: Duration,
}

impl UrlCache {
    /// Create a cache. `disk_dir` enables the disk tier.
    #[must_use]
    pub fn new(ttl: Duration, disk_dir: Option<PathBuf>) -> Self {
        Self {
            memory: DashMap::new(),
            disk_dir,
            ttl,
        }
    }

    /// Freshness window.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Disk tier root, if enabled.
    #[must_use]
    pub fn disk_dir(&self) -> Option<&Path> {
        self.disk_dir.as_deref()
    }

    /// Whether `entry` is younger than the TTL.
    #[must_use]
    pub fn is_fresh(&self, entry: &UrlCacheEntry) -> bool {
        let Ok(ttl) = chrono::Duration::from_std(self.ttl) else {
            return true;
        };
        Utc::now().signed_duration_since(entry.fetched_at) < ttl
    }

    /// Look up `url` in memory, then on disk. Stale entries are returned too
    /// so callers can revalidate them.
    pub async fn get(&self, url: &str) -> Option<(UrlCacheEntry, CacheTier)> {
        if let Some(entry) = self.memory.get(url) {
            return Some((entry.clone(), CacheTier::Memory));
        }
        let path = self.disk_path(url)?;
        let entry = tokio::task::spawn_blocking(move || read_json::<UrlCacheEntry>(&path))
            .await
            .ok()?;
        match entry {
            Ok(Some(entry)) => {
                self.memory.insert(url.to_owned(), entry.clone());
                Some((entry, CacheTier::Disk))
            },
            Ok(None) => None,
            Err(e) => {
                debug!(url, error = %e, "Ignoring unreadable URL cache file");
                None
            },
        }
    }

    /// Store `entry` in both tiers.
    pub async fn put(&self, url: &str, entry: UrlCacheEntry) {
        self.memory.insert(url.to_owned(), entry.clone());
        self.persist(url, entry).await;
    }

    /// Mark the entry for `url` as just fetched, keeping its body.
    pub async fn refresh(&self, url: &str) -> Option<UrlCacheEntry> {
        let (mut entry, _) = self.get(url).await?;
        entry.fetched_at = Utc::now();
        self.put(url, entry.clone()).await;
        Some(entry)
    }

    /// Number of entries in the memory tier.
    #[must_use]
    pub fn len(&self) -> usize {
        self.memory.len()
    }

    /// Whether the memory tier is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }

    /// Empty both tiers.
    ///
    /// # Errors
    ///
    /// Returns an error if the disk tier exists but cannot be removed.
    pub async fn clear(&self) -> PluginResult<()> {
        self.memory.clear();
        if let Some(dir) = &self.disk_dir {
            crate::cache::remove_dir_tolerant(dir).await?;
        }
        Ok(())
    }

    /// Drop expired entries from both tiers. Returns how many disk files
    /// were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the disk tier cannot be walked.
    pub async fn prune_expired(&self) -> PluginResult<usize> {
        self.memory.retain(|_, entry| self.is_fresh(entry));

        let Some(dir) = self.disk_dir.clone() else {
            return Ok(0);
        };
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX);
        tokio::task::spawn_blocking(move || -> PluginResult<usize> {
            if !dir.is_dir() {
                return Ok(0);
            }
            let now = Utc::now();
            let mut removed: usize = 0;
            for file in walkdir::WalkDir::new(&dir)
                .follow_links(false)
                .into_iter()
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_file())
            {
                let expired = match read_json::<UrlCacheEntry>(file.path()) {
                    Ok(Some(entry)) => now.signed_duration_since(entry.fetched_at) >= ttl,
                    Ok(None) => false,
                    Err(_) => true,
                };
                if expired {
                    std::fs::remove_file(file.path())?;
                    removed = removed.saturating_add(1);
                }
            }
            Ok(removed)
        })
        .await
        .map_err(join_err)?
    }

    async fn persist(&self, url: &str, entry: UrlCacheEntry) {
        let Some(path) = self.disk_path(url) else {
            return;
        };
        let result = tokio::task::spawn_blocking(move || write_json_atomic(&path, &entry)).await;
        match result {
            Ok(Ok(())) => {},
            Ok(Err(e)) => debug!(url, error = %e, "Failed to persist URL cache entry"),
            Err(e) => debug!(url, error = %e, "URL cache write task failed"),
        }
    }

    /// `<dir>/<host>/<sha256(url)>.json`
    fn disk_path(&self, url: &str) -> Option<PathBuf> {
        let dir = self.disk_dir.as_ref()?;
        let host = url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(sanitize_host))
            .unwrap_or_else(|| "_".to_owned());
        let digest = hex::encode(Sha256::digest(url.as_bytes()));
        Some(dir.join(host).join(format!("{digest}.json")))
    }
}

fn sanitize_host(host: &str) -> String {
    host.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-') { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(body: &str, age: chrono::Duration) -> UrlCacheEntry {
        UrlCacheEntry {
            content: body.into(),
            fetched_at: Utc::now().checked_sub_signed(age).unwrap(),
            etag: Some("\"v1\"".into()),
            last_modified: None,
        }
    }

    const URL: &str = "https://example.com/rules/a.md";

    #[tokio::test]
    async fn memory_tier_round_trip() {
        let cache = UrlCache::new(DEFAULT_URL_TTL, None);
        assert!(cache.get(URL).await.is_none());
        cache.put(URL, entry("body", chrono::Duration::zero())).await;
        let (hit, tier) = cache.get(URL).await.unwrap();
        assert_eq!(hit.content, "body");
        assert_eq!(tier, CacheTier::Memory);
        assert!(cache.is_fresh(&hit));
    }

    #[tokio::test]
    async fn disk_tier_survives_new_instance() {
        let dir = tempfile::tempdir().unwrap();
        let first = UrlCache::new(DEFAULT_URL_TTL, Some(dir.path().to_path_buf()));
        first.put(URL, entry("body", chrono::Duration::zero())).await;

        let expected = dir
            .path()
            .join("example.com")
            .join(format!("{}.json", hex::encode(Sha256::digest(URL.as_bytes()))));
        assert!(expected.exists());

        let second = UrlCache::new(DEFAULT_URL_TTL, Some(dir.path().to_path_buf()));
        let (hit, tier) = second.get(URL).await.unwrap();
        assert_eq!(hit.content, "body");
        assert_eq!(tier, CacheTier::Disk);
    }

    #[tokio::test]
    async fn stale_entries_are_returned_but_not_fresh() {
        let cache = UrlCache::new(Duration::from_secs(60), None);
        cache.put(URL, entry("old", chrono::Duration::minutes(5))).await;
        let (hit, _) = cache.get(URL).await.unwrap();
        assert!(!cache.is_fresh(&hit));

        let refreshed = cache.refresh(URL).await.unwrap();
        assert_eq!(refreshed.content, "old");
        assert!(cache.is_fresh(&refreshed));
    }

    #[tokio::test]
    async fn clear_empties_both_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let disk = dir.path().join("url-cache");
        let cache = UrlCache::new(DEFAULT_URL_TTL, Some(disk.clone()));
        cache.put(URL, entry("body", chrono::Duration::zero())).await;
        cache.clear().await.unwrap();
        assert!(cache.is_empty());
        assert!(!disk.exists());
        assert!(cache.get(URL).await.is_none());
    }

    #[tokio::test]
    async fn prune_removes_expired_disk_entries() {
        let dir = tempfile::tempdir().unwrap();
        let cache = UrlCache::new(Duration::from_secs(60), Some(dir.path().to_path_buf()));
        cache.put(URL, entry("old", chrono::Duration::minutes(5))).await;
        cache
            .put("https://example.com/rules/b.md", entry("new", chrono::Duration::zero()))
            .await;

        assert_eq!(cache.prune_expired().await.unwrap(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("https://example.com/rules/b.md").await.is_some());
    }
}
