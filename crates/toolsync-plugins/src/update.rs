//! Version swaps that keep the old copy until the new one is committed.
//!
//! ```text
//! Idle → BackupOverrides → InvalidateOld → FetchNew → RestoreOverrides → Commit → Done
//! ```
//!
//! The old directory is renamed aside rather than deleted, so any failure up
//! to and including `Commit` puts the old directory, its manifest entry and
//! the user's `.local-overrides/` back where they were. The whole sequence
//! holds an exclusive lock on `<cache root>/.<id>.update.lk`.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::cache::store::lock_exclusive;
use crate::cache::{
    CacheMetadata, LOCAL_OVERRIDES_DIR, PluginCache, PluginCacheEntry, join_err,
    remove_dir_tolerant,
};
use crate::error::{PluginError, PluginResult};
use crate::git::{FetchedPlugin, GitFetchOptions, PluginFetcher};
use crate::source::{SourceDescriptor, is_local_path};
use crate::version::{RemoteTagSource, sort_versions};

/// Steps of an update, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateStage {
    /// Nothing has happened yet.
    Idle,
    /// Moving `.local-overrides/` out of the old copy.
    BackupOverrides,
    /// Moving the old copy aside and dropping its manifest entry.
    InvalidateOld,
    /// Fetching the new version.
    FetchNew,
    /// Merging the saved overrides into the new copy.
    RestoreOverrides,
    /// Recording the new entry and deleting the old copy.
    Commit,
    /// Finished.
    Done,
}

impl UpdateStage {
    /// The stage that follows this one.
    #[must_use]
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Idle => Some(Self::BackupOverrides),
            Self::BackupOverrides => Some(Self::InvalidateOld),
            Self::InvalidateOld => Some(Self::FetchNew),
            Self::FetchNew => Some(Self::RestoreOverrides),
            Self::RestoreOverrides => Some(Self::Commit),
            Self::Commit => Some(Self::Done),
            Self::Done => None,
        }
    }
}

impl fmt::Display for UpdateStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::BackupOverrides => "backup-overrides",
            Self::InvalidateOld => "invalidate-old",
            Self::FetchNew => "fetch-new",
            Self::RestoreOverrides => "restore-overrides",
            Self::Commit => "commit",
            Self::Done => "done",
        };
        f.write_str(s)
    }
}

/// Progress of an update as reported to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateState {
    /// Currently in this stage.
    Active(UpdateStage),
    /// Aborted in this stage; the previous installation was restored.
    Failed {
        /// The stage that failed.
        stage: UpdateStage,
    },
}

/// Observer called on every state transition.
pub type ProgressFn = Arc<dyn Fn(UpdateState) + Send + Sync>;

/// Knobs for [`update_plugin`].
#[derive(Clone, Default)]
pub struct UpdateOptions {
    /// Version to install. Defaults to the newest remote tag.
    pub target_version: Option<String>,
    /// Options for the fetch. `force_refresh` is always set.
    pub fetch: GitFetchOptions,
    /// Progress observer.
    pub progress: Option<ProgressFn>,
}

impl fmt::Debug for UpdateOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateOptions")
            .field("target_version", &self.target_version)
            .field("fetch", &self.fetch)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Outcome of a successful update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResult {
    /// Source without any `#ref`.
    pub source: String,
    /// Cache id of the installed copy after the update.
    pub plugin_id: String,
    /// Version before the update.
    pub previous_version: Option<String>,
    /// Version after the update.
    pub new_version: String,
    /// Always true; failures are returned as errors.
    pub success: bool,
}

/// Update a cached git plugin to `options.target_version` (or the latest tag).
///
/// Updating to the version already installed succeeds without changes.
///
/// # Errors
///
/// - [`PluginError::LocalSourceUnsupported`] for filesystem paths.
/// - [`PluginError::NotFound`] if the plugin is not cached.
/// - [`PluginError::NoVersionsFound`] / [`PluginError::GitUnavailable`] when
///   resolving the latest version fails.
/// - [`PluginError::UpdateFailed`] if a step fails; the previous installation
///   has been restored by then.
pub async fn update_plugin(
    cache: &PluginCache,
    fetcher: &dyn PluginFetcher,
    tags: &dyn RemoteTagSource,
    source: &str,
    options: &UpdateOptions,
) -> PluginResult<UpdateResult> {
    if is_local_path(source) {
        return Err(PluginError::LocalSourceUnsupported(source.to_owned()));
    }
    let SourceDescriptor::Git(git) = SourceDescriptor::parse(source, options.fetch.use_ssh)? else {
        return Err(PluginError::invalid_source(source, "only git sources can be updated"));
    };
    let base = git.base_source().to_owned();

    let installed = cache
        .find_by_source(&base)
        .await
        .into_iter()
        .max_by_key(|e| e.cached_at)
        .ok_or_else(|| PluginError::NotFound(format!("{base} is not cached")))?;
    if !tokio::fs::try_exists(&installed.path).await.unwrap_or(false) {
        return Err(PluginError::NotFound(format!(
            "{base} has no cache directory at {}",
            installed.path.display()
        )));
    }
    let previous_version = installed.version.clone();

    let target = match &options.target_version {
        Some(version) => version.clone(),
        None => latest_version(tags, &base, &git.clone_url, &options.fetch).await?,
    };

    if previous_version.as_deref() == Some(target.as_str()) {
        info!(source = %base, version = %target, "Plugin already at requested version");
        return Ok(UpdateResult {
            source: base,
            plugin_id: installed.id,
            previous_version,
            new_version: target,
            success: true,
        });
    }

    let lock_path = cache
        .cache_root()
        .join(format!(".{}.update.lk", installed.id));
    let _lock = tokio::task::spawn_blocking(move || lock_exclusive(&lock_path))
        .await
        .map_err(join_err)??;

    let swap = Swap::new(cache, installed, options.progress.clone());
    let new_source = git.pinned(&target);
    let fetched = swap.run(fetcher, &new_source, &target, &options.fetch).await?;

    info!(
        source = %base,
        from = ?previous_version,
        to = %target,
        plugin_id = %fetched.plugin_id,
        "Updated plugin"
    );
    Ok(UpdateResult {
        source: base,
        plugin_id: fetched.plugin_id,
        previous_version,
        new_version: target,
        success: true,
    })
}

async fn latest_version(
    tags: &dyn RemoteTagSource,
    base: &str,
    clone_url: &str,
    fetch: &GitFetchOptions,
) -> PluginResult<String> {
    if !tags.is_available() {
        return Err(PluginError::GitUnavailable);
    }
    let remote = tags
        .list_tags(clone_url, fetch.timeout, fetch.token.as_ref())
        .await?;
    sort_versions(&remote)
        .into_iter()
        .next()
        .ok_or_else(|| PluginError::NoVersionsFound(base.to_owned()))
}

/// One in-flight swap and everything needed to undo it.
struct Swap<'a> {
    cache: &'a PluginCache,
    installed: PluginCacheEntry,
    old_dir: PathBuf,
    aside: PathBuf,
    backup: PathBuf,
    progress: Option<ProgressFn>,
    has_backup: bool,
    moved_aside: bool,
}

impl<'a> Swap<'a> {
    fn new(
        cache: &'a PluginCache,
        installed: PluginCacheEntry,
        progress: Option<ProgressFn>,
    ) -> Self {
        let root = cache.cache_root();
        Self {
            old_dir: installed.path.clone(),
            aside: root.join(format!(".{}.previous", installed.id)),
            backup: root.join(format!(".{}.overrides-backup", installed.id)),
            cache,
            installed,
            progress,
            has_backup: false,
            moved_aside: false,
        }
    }

    fn emit(&self, state: UpdateState) {
        if let Some(progress) = &self.progress {
            progress(state);
        }
    }

    fn enter(&self, stage: UpdateStage) {
        debug!(plugin_id = %self.installed.id, stage = %stage, "Update stage");
        self.emit(UpdateState::Active(stage));
    }

    async fn run(
        mut self,
        fetcher: &dyn PluginFetcher,
        new_source: &str,
        target: &str,
        fetch: &GitFetchOptions,
    ) -> PluginResult<FetchedPlugin> {
        self.enter(UpdateStage::Idle);
        for leftover in [&self.backup, &self.aside] {
            if exists(leftover).await {
                let reason = format!(
                    "leftover {} from an interrupted update; move its contents back or remove it",
                    leftover.display()
                );
                return Err(self.fail(UpdateStage::Idle, reason, None).await);
            }
        }

        self.enter(UpdateStage::BackupOverrides);
        let overrides = self.old_dir.join(LOCAL_OVERRIDES_DIR);
        if exists(&overrides).await {
            if let Err(e) = tokio::fs::rename(&overrides, &self.backup).await {
                return Err(self.fail(UpdateStage::BackupOverrides, e.to_string(), None).await);
            }
            self.has_backup = true;
        }

        self.enter(UpdateStage::InvalidateOld);
        if let Err(e) = tokio::fs::rename(&self.old_dir, &self.aside).await {
            return Err(self.fail(UpdateStage::InvalidateOld, e.to_string(), None).await);
        }
        self.moved_aside = true;
        if let Err(e) = self.cache.detach_entry(&self.installed.id).await {
            return Err(self.fail(UpdateStage::InvalidateOld, e.to_string(), None).await);
        }

        self.enter(UpdateStage::FetchNew);
        let mut fetch = fetch.clone();
        fetch.force_refresh = true;
        let fetched = match fetcher.fetch(new_source, &fetch).await {
            Ok(fetched) => fetched,
            Err(e) => return Err(self.fail(UpdateStage::FetchNew, e.to_string(), None).await),
        };

        self.enter(UpdateStage::RestoreOverrides);
        if self.has_backup {
            let backup = self.backup.clone();
            let dest = fetched.path.join(LOCAL_OVERRIDES_DIR);
            let merged = tokio::task::spawn_blocking(move || merge_overrides(&backup, &dest))
                .await
                .map_err(|e| io::Error::other(e.to_string()))
                .and_then(|r| r);
            if let Err(e) = merged {
                return Err(self
                    .fail(UpdateStage::RestoreOverrides, e.to_string(), Some(&fetched))
                    .await);
            }
            self.has_backup = false;
        }

        self.enter(UpdateStage::Commit);
        let metadata = CacheMetadata {
            content_hash: Some(fetched.content_hash.clone()),
            manifest: None,
        };
        if let Err(e) = self
            .cache
            .cache_plugin(new_source, Some(target), &fetched.path, Some(metadata))
            .await
        {
            return Err(self.fail(UpdateStage::Commit, e.to_string(), Some(&fetched)).await);
        }
        if let Err(e) = remove_dir_tolerant(&self.aside).await {
            warn!(
                path = %self.aside.display(),
                error = %e,
                "Failed to remove previous plugin copy"
            );
        }

        self.enter(UpdateStage::Done);
        Ok(fetched)
    }

    /// Undo everything done so far and build the error to return.
    async fn fail(
        &self,
        stage: UpdateStage,
        reason: String,
        fetched: Option<&FetchedPlugin>,
    ) -> PluginError {
        warn!(
            plugin_id = %self.installed.id,
            stage = %stage,
            reason = %reason,
            "Update failed, rolling back"
        );

        if let Some(fetched) = fetched {
            if let Err(e) = self.cache.detach_entry(&fetched.plugin_id).await {
                warn!(
                    plugin_id = %fetched.plugin_id,
                    error = %e,
                    "Rollback: failed to drop new entry"
                );
            }
            if fetched.path != self.old_dir
                && let Err(e) = remove_dir_tolerant(&fetched.path).await
            {
                warn!(
                    path = %fetched.path.display(),
                    error = %e,
                    "Rollback: failed to remove new copy"
                );
            }
        }

        if self.moved_aside {
            if let Err(e) = self.restore_old_dir().await {
                warn!(
                    path = %self.aside.display(),
                    error = %e,
                    "Rollback: failed to restore previous copy"
                );
            }
            if let Err(e) = self.cache.restore_entry(self.installed.clone()).await {
                warn!(
                    plugin_id = %self.installed.id,
                    error = %e,
                    "Rollback: failed to restore entry"
                );
            }
        }

        if self.has_backup {
            let overrides = self.old_dir.join(LOCAL_OVERRIDES_DIR);
            if let Err(e) = tokio::fs::rename(&self.backup, &overrides).await {
                warn!(
                    path = %self.backup.display(),
                    error = %e,
                    "Rollback: failed to restore local overrides"
                );
            }
        }

        self.emit(UpdateState::Failed { stage });
        PluginError::UpdateFailed { stage, reason }
    }

    async fn restore_old_dir(&self) -> PluginResult<()> {
        remove_dir_tolerant(&self.old_dir).await?;
        tokio::fs::rename(&self.aside, &self.old_dir).await?;
        Ok(())
    }
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

/// Move `backup` into `dest`. Files from `backup` replace same-named files
/// already in `dest`; nothing outside `dest` is touched.
fn merge_overrides(backup: &Path, dest: &Path) -> io::Result<()> {
    if !dest.exists() {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        return std::fs::rename(backup, dest);
    }
    for entry in WalkDir::new(backup).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        let rel = entry.path().strip_prefix(backup).map_err(io::Error::other)?;
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    std::fs::remove_dir_all(backup)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_advance_in_order() {
        let mut stage = UpdateStage::Idle;
        let mut seen = vec![stage];
        while let Some(next) = stage.next() {
            seen.push(next);
            stage = next;
        }
        assert_eq!(seen.len(), 7);
        assert_eq!(seen.last(), Some(&UpdateStage::Done));
        assert_eq!(UpdateStage::FetchNew.to_string(), "fetch-new");
    }

    #[test]
    fn merge_moves_backup_when_destination_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let backup = dir.path().join("backup");
        std::fs::create_dir_all(backup.join("rules")).unwrap();
        std::fs::write(backup.join("rules/mine.md"), "mine").unwrap();
        let dest = dir.path().join("plugin").join(LOCAL_OVERRIDES_DIR);

        merge_overrides(&backup, &dest).unwrap();
        assert_eq!(std::fs::read_to_string(dest.join("rules/mine.md")).unwrap(), "mine");
        assert!(!backup.exists());
    }

    #[test]
    fn merge_prefers_user_files() {
        let dir = tempfile::tempdir().unwrap();
        let backup = dir.path().join("backup");
        let dest = dir.path().join("dest");
        std::fs::create_dir_all(&backup).unwrap();
        std::fs::create_dir_all(&dest).unwrap();
        std::fs::write(backup.join("note.txt"), "user").unwrap();
        std::fs::write(dest.join("note.txt"), "shipped").unwrap();
        std::fs::write(dest.join("other.txt"), "shipped").unwrap();

        merge_overrides(&backup, &dest).unwrap();
        assert_eq!(std::fs::read_to_string(dest.join("note.txt")).unwrap(), "user");
        assert_eq!(std::fs::read_to_string(dest.join("other.txt")).unwrap(), "shipped");
        assert!(!backup.exists());
    }
}
