//! Per-repository fetch record.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::store::{read_json, write_json_atomic};
use crate::error::PluginResult;

/// File name of the fetch record inside a fetched repository.
pub const GIT_METADATA_FILE: &str = ".ai-tool-sync-metadata.json";

/// When and from where a repository was last fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitFetchMetadata {
    /// Source specifier.
    pub source: String,
    /// URL handed to git.
    pub clone_url: String,
    /// Completion time of the last successful fetch.
    pub last_fetched: DateTime<Utc>,
    /// `HEAD` after checkout.
    pub commit_sha: String,
}

impl GitFetchMetadata {
    /// Read the record under `repo_dir`. `Ok(None)` if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed.
    pub fn read(repo_dir: &Path) -> PluginResult<Option<Self>> {
        read_json(&repo_dir.join(GIT_METADATA_FILE))
    }

    /// Atomically write the record under `repo_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write(&self, repo_dir: &Path) -> PluginResult<()> {
        write_json_atomic(&repo_dir.join(GIT_METADATA_FILE), self)
    }

    /// Whether the fetch happened less than `ttl` ago.
    #[must_use]
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            return true;
        };
        Utc::now().signed_duration_since(self.last_fetched) < ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(age: chrono::Duration) -> GitFetchMetadata {
        GitFetchMetadata {
            source: "github:acme/rules".into(),
            clone_url: "https://github.com/acme/rules.git".into(),
            last_fetched: Utc::now().checked_sub_signed(age).unwrap(),
            commit_sha: "0123456789abcdef".into(),
        }
    }

    #[test]
    fn freshness_respects_ttl() {
        let ttl = Duration::from_secs(3600);
        assert!(record(chrono::Duration::minutes(5)).is_fresh(ttl));
        assert!(!record(chrono::Duration::hours(2)).is_fresh(ttl));
        assert!(!record(chrono::Duration::zero()).is_fresh(Duration::ZERO));
    }

    #[test]
    fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        assert!(GitFetchMetadata::read(dir.path()).unwrap().is_none());
        let meta = record(chrono::Duration::zero());
        meta.write(dir.path()).unwrap();
        let raw = std::fs::read_to_string(dir.path().join(GIT_METADATA_FILE)).unwrap();
        assert!(raw.contains("commitSha"));
        assert_eq!(GitFetchMetadata::read(dir.path()).unwrap(), Some(meta));
    }
}
