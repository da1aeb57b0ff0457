//! Git fetcher.
//!
//! Each plugin lives in its own repository under the cache root. A fetch
//! reuses that repository: `git init` once, then a shallow
//! `git fetch --depth N origin <ref>` followed by a detached checkout of
//! `FETCH_HEAD`, so tags, branches and commit SHAs all take the same path.
//! Files under `.local-overrides/` are untracked and survive the checkout.

pub mod command;
pub(crate) mod discover;
pub mod metadata;

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use toolsync_core::content::{ContentParser, LoadResult};
use tracing::{debug, info, warn};

pub use self::command::{GitToken, git_available};
use self::command::run_git;
use self::discover::discover_content;
pub use self::metadata::{GIT_METADATA_FILE, GitFetchMetadata};
use crate::cache::{
    CacheMetadata, PluginCache, PluginManifestInfo, content_hash, generate_plugin_id, join_err,
    remove_dir_tolerant,
};
use crate::error::{PluginError, PluginResult};
use crate::loader::{LoadOptions, Loader};
use crate::source::{GitSource, SourceDescriptor, can_load_git};

/// Default freshness window for fetched repositories.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(86_400);

/// Default bound on each git subprocess.
pub const DEFAULT_GIT_TIMEOUT: Duration = Duration::from_secs(300);

/// Knobs for a single git fetch.
#[derive(Debug, Clone)]
pub struct GitFetchOptions {
    /// How long a fetched repository is reused without refetching.
    pub cache_ttl: Duration,
    /// Refetch even when the cached copy is fresh.
    pub force_refresh: bool,
    /// Bound on each git subprocess.
    pub timeout: Duration,
    /// Token for private remotes.
    pub token: Option<GitToken>,
    /// Shallow fetch depth.
    pub depth: u32,
    /// Prefer SSH clone URLs for shorthand sources.
    pub use_ssh: bool,
}

impl Default for GitFetchOptions {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_CACHE_TTL,
            force_refresh: false,
            timeout: DEFAULT_GIT_TIMEOUT,
            token: None,
            depth: 1,
            use_ssh: false,
        }
    }
}

/// A repository checked out in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPlugin {
    /// Cache id.
    pub plugin_id: String,
    /// Repository root.
    pub path: PathBuf,
    /// Directory holding the content (`path` joined with any subpath).
    pub content_root: PathBuf,
    /// The ref that was fetched, if any.
    pub version: Option<String>,
    /// `HEAD` after checkout.
    pub commit_sha: String,
    /// Short hash identifying the fetched content.
    pub content_hash: String,
    /// Whether the cached copy was reused without touching the network.
    pub from_cache: bool,
}

/// Fetches a source into the plugin cache.
#[async_trait]
pub trait PluginFetcher: Send + Sync {
    /// Fetch `source`, reusing a fresh cached copy when allowed.
    async fn fetch(&self, source: &str, options: &GitFetchOptions) -> PluginResult<FetchedPlugin>;
}

/// [`PluginFetcher`] backed by the `git` CLI.
#[derive(Debug, Clone)]
pub struct GitFetcher {
    cache: Arc<PluginCache>,
}

impl GitFetcher {
    /// Create a fetcher writing through `cache`.
    #[must_use]
    pub fn new(cache: Arc<PluginCache>) -> Self {
        Self { cache }
    }

    /// The cache this fetcher writes to.
    #[must_use]
    pub fn cache(&self) -> &Arc<PluginCache> {
        &self.cache
    }

    /// Fetch an already-parsed source. `git.raw` is the cache key.
    ///
    /// # Errors
    ///
    /// - [`PluginError::GitUnavailable`] if a fetch is needed and `git` is
    ///   missing.
    /// - [`PluginError::SubpathMissing`] if the subpath does not exist.
    /// - Any git subprocess or cache write failure.
    pub async fn fetch_git(
        &self,
        git: &GitSource,
        options: &GitFetchOptions,
    ) -> PluginResult<FetchedPlugin> {
        let source = git.raw.as_str();
        let version = git.git_ref.clone();
        let plugin_id = generate_plugin_id(source, version.as_deref());
        let path = self.cache.plugin_path(&plugin_id);

        if let Some(hit) = self.try_cached(source, git, &plugin_id, &path, options).await? {
            return Ok(hit);
        }

        if !git_available() {
            return Err(PluginError::GitUnavailable);
        }

        let fresh_dir = !tokio::fs::try_exists(&path).await.unwrap_or(false);
        info!(
            plugin_id = %plugin_id,
            url = %git.clone_url,
            git_ref = ?version,
            "Fetching plugin repository"
        );

        let commit_sha = match self.fetch_into(git, &path, options).await {
            Ok(sha) => sha,
            Err(e) => {
                if fresh_dir && let Err(cleanup) = remove_dir_tolerant(&path).await {
                    warn!(
                        path = %path.display(),
                        error = %cleanup,
                        "Failed to remove partial fetch"
                    );
                }
                return Err(e);
            },
        };

        let content_root = match content_root(git, &path).await {
            Ok(root) => root,
            Err(e) => {
                if fresh_dir {
                    if let Err(cleanup) = remove_dir_tolerant(&path).await {
                        warn!(
                            path = %path.display(),
                            error = %cleanup,
                            "Failed to remove fetch without subpath"
                        );
                    }
                } else {
                    restore_previous_checkout(&path, options).await;
                }
                return Err(e);
            },
        };

        let meta = GitFetchMetadata {
            source: source.to_owned(),
            clone_url: git.clone_url.clone(),
            last_fetched: Utc::now(),
            commit_sha: commit_sha.clone(),
        };
        let repo = path.clone();
        tokio::task::spawn_blocking(move || meta.write(&repo))
            .await
            .map_err(join_err)??;

        self.register(source, version.as_deref(), &path, &content_root, &commit_sha)
            .await?;
        info!(plugin_id = %plugin_id, commit = %commit_sha, "Fetched plugin repository");

        Ok(FetchedPlugin {
            plugin_id,
            path,
            content_root,
            version,
            content_hash: content_hash(commit_sha.as_bytes()),
            commit_sha,
            from_cache: false,
        })
    }

    async fn try_cached(
        &self,
        source: &str,
        git: &GitSource,
        plugin_id: &str,
        path: &Path,
        options: &GitFetchOptions,
    ) -> PluginResult<Option<FetchedPlugin>> {
        if options.force_refresh
            || !tokio::fs::try_exists(path.join(".git")).await.unwrap_or(false)
        {
            return Ok(None);
        }
        let repo = path.to_path_buf();
        let Ok(Some(meta)) = tokio::task::spawn_blocking(move || GitFetchMetadata::read(&repo))
            .await
            .map_err(join_err)?
        else {
            return Ok(None);
        };
        if !meta.is_fresh(options.cache_ttl) {
            debug!(plugin_id, "Cached repository is stale");
            return Ok(None);
        }

        let content_root = content_root(git, path).await?;
        let version = git.git_ref.as_deref();
        if self.cache.get_cache_entry(source, version).await.is_none() {
            self.register(source, version, path, &content_root, &meta.commit_sha)
                .await?;
        }
        self.cache.touch_plugin(plugin_id).await;
        debug!(plugin_id, path = %path.display(), "Using cached repository");

        Ok(Some(FetchedPlugin {
            plugin_id: plugin_id.to_owned(),
            path: path.to_path_buf(),
            content_root,
            version: version.map(str::to_owned),
            content_hash: content_hash(meta.commit_sha.as_bytes()),
            commit_sha: meta.commit_sha,
            from_cache: true,
        }))
    }

    async fn fetch_into(
        &self,
        git: &GitSource,
        path: &Path,
        options: &GitFetchOptions,
    ) -> PluginResult<String> {
        let token = options.token.as_ref();
        let timeout = options.timeout;
        let depth = format!("--depth={}", options.depth.max(1));
        let target = git.git_ref.as_deref().unwrap_or("HEAD");

        tokio::fs::create_dir_all(path).await?;
        if tokio::fs::try_exists(path.join(".git")).await.unwrap_or(false) {
            let set_url = ["remote", "set-url", "origin", git.clone_url.as_str()];
            run_git(&set_url, Some(path), timeout, token).await?;
        } else {
            run_git(&["init", "--quiet"], Some(path), timeout, token).await?;
            let add = ["remote", "add", "origin", git.clone_url.as_str()];
            run_git(&add, Some(path), timeout, token).await?;
        }
        run_git(
            &["fetch", "--quiet", "--no-tags", &depth, "origin", target],
            Some(path),
            timeout,
            token,
        )
        .await?;
        run_git(
            &["checkout", "--quiet", "--detach", "--force", "FETCH_HEAD"],
            Some(path),
            timeout,
            token,
        )
        .await?;
        let sha = run_git(&["rev-parse", "HEAD"], Some(path), timeout, token).await?;
        Ok(sha.trim().to_owned())
    }

    async fn register(
        &self,
        source: &str,
        version: Option<&str>,
        path: &Path,
        content_root: &Path,
        commit_sha: &str,
    ) -> PluginResult<()> {
        let root = content_root.to_path_buf();
        let repo = path.to_path_buf();
        let manifest = tokio::task::spawn_blocking(move || {
            PluginManifestInfo::read(&root).or_else(|| PluginManifestInfo::read(&repo))
        })
        .await
        .map_err(join_err)?;
        let metadata = CacheMetadata {
            content_hash: Some(content_hash(commit_sha.as_bytes())),
            manifest,
        };
        self.cache
            .cache_plugin(source, version, path, Some(metadata))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl PluginFetcher for GitFetcher {
    async fn fetch(&self, source: &str, options: &GitFetchOptions) -> PluginResult<FetchedPlugin> {
        let SourceDescriptor::Git(git) = SourceDescriptor::parse(source, options.use_ssh)? else {
            return Err(PluginError::invalid_source(source, "not a git source"));
        };
        self.fetch_git(&git, options).await
    }
}

/// Put an existing checkout back on the commit its sidecar records.
///
/// Untracked files, `.local-overrides/` included, are left alone. Failures
/// are logged; the caller is already returning an error.
async fn restore_previous_checkout(path: &Path, options: &GitFetchOptions) {
    let repo = path.to_path_buf();
    let previous = match tokio::task::spawn_blocking(move || GitFetchMetadata::read(&repo)).await {
        Ok(Ok(Some(meta))) => meta.commit_sha,
        _ => {
            warn!(path = %path.display(), "No recorded commit to restore");
            return;
        },
    };
    let restored = run_git(
        &["checkout", "--quiet", "--detach", "--force", &previous],
        Some(path),
        options.timeout,
        options.token.as_ref(),
    )
    .await;
    match restored {
        Ok(_) => debug!(path = %path.display(), commit = %previous, "Restored previous checkout"),
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to restore previous checkout"),
    }
}

/// Resolve the content directory, failing if the subpath is absent.
///
/// Every subpath component must be a real directory: a symlink anywhere
/// along the way counts as missing.
async fn content_root(git: &GitSource, repo: &Path) -> PluginResult<PathBuf> {
    let Some(subpath) = git.subpath.as_deref() else {
        return Ok(repo.to_path_buf());
    };
    let missing = || PluginError::SubpathMissing {
        subpath: subpath.to_owned(),
        root: repo.to_path_buf(),
    };

    let mut root = repo.to_path_buf();
    for component in Path::new(subpath).components() {
        let Component::Normal(part) = component else {
            return Err(missing());
        };
        root.push(part);
        match tokio::fs::symlink_metadata(&root).await {
            Ok(meta) if meta.is_dir() => {},
            Ok(meta) if meta.file_type().is_symlink() => {
                warn!(path = %root.display(), "Subpath goes through a symlink; not followed");
                return Err(missing());
            },
            _ => return Err(missing()),
        }
    }
    Ok(root)
}

/// [`Loader`] for git sources: fetch, then discover content.
#[derive(Clone)]
pub struct GitLoader {
    fetcher: Arc<dyn PluginFetcher>,
    defaults: GitFetchOptions,
    parser: Arc<dyn ContentParser>,
}

impl GitLoader {
    /// Create a loader with per-call defaults.
    #[must_use]
    pub fn new(
        fetcher: Arc<dyn PluginFetcher>,
        defaults: GitFetchOptions,
        parser: Arc<dyn ContentParser>,
    ) -> Self {
        Self {
            fetcher,
            defaults,
            parser,
        }
    }
}

impl std::fmt::Debug for GitLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitLoader")
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Loader for GitLoader {
    fn name(&self) -> &'static str {
        "git"
    }

    fn can_load(&self, source: &str) -> bool {
        can_load_git(source)
    }

    async fn load(&self, source: &str, options: &LoadOptions) -> PluginResult<LoadResult> {
        let mut fetch = self.defaults.clone();
        fetch.force_refresh |= options.force_refresh;
        fetch.use_ssh |= options.use_ssh;

        let fetched = self.fetcher.fetch(source, &fetch).await?;
        let parser = Arc::clone(&self.parser);
        let root = fetched.content_root.clone();
        let source = source.to_owned();
        tokio::task::spawn_blocking(move || {
            let mut result = LoadResult::new(source);
            discover_content(&root, parser.as_ref(), &mut result);
            result
        })
        .await
        .map_err(join_err)
    }
}
