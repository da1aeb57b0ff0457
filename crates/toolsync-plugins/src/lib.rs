//! Remote plugin sourcing and caching for ai-tool-sync.
//!
//! - [`SourceDescriptor`]: parsed `github:`, `git:`, `git@`, and URL specifiers
//! - [`PluginCache`]: durable manifest plus per-plugin sidecars on disk
//! - [`GitFetcher`]: shallow, sandboxed `git` fetches into the cache
//! - [`UrlFetcher`]: HTTP fetches with a two-tier [`UrlCache`] and revalidation
//! - [`check_for_updates`] / [`check_all_plugins_for_updates`]: remote tag
//!   discovery via `git ls-remote`
//! - [`update_plugin`]: version swaps that preserve `.local-overrides/`
//! - [`PluginLoader`]: dispatches a source to the [`GitLoader`] or [`UrlLoader`]
//!
//! # Cache Layout
//!
//! ```text
//! ~/.ai-tool-sync/plugins/
//! ├── cache-manifest.json
//! ├── cache-manifest.lk
//! └── <plugin-id>/
//!     ├── .plugin-cache-meta.json
//!     ├── .ai-tool-sync-metadata.json
//!     └── .local-overrides/
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod cache;
pub mod error;
pub mod git;
pub mod loader;
pub mod source;
pub mod update;
pub mod url;
pub mod version;

pub use cache::{
    CacheMetadata, PluginCache, PluginCacheEntry, PluginCacheManifest, PluginCacheMetadata,
    PluginManifestInfo, ReconcileReport, content_hash, generate_plugin_id,
};
pub use error::{PluginError, PluginResult};
pub use git::{
    FetchedPlugin, GitFetchOptions, GitFetcher, GitLoader, GitToken, PluginFetcher, git_available,
};
pub use loader::{LoadOptions, Loader, PluginLoader};
pub use source::{
    GitHost, GitSource, Provider, SourceDescriptor, UrlSource, can_load_git, can_load_url,
    is_local_path, parse_source,
};
pub use update::{UpdateOptions, UpdateResult, UpdateStage, UpdateState, update_plugin};
pub use self::url::{FetchOrigin, UrlCache, UrlFetchOptions, UrlFetcher, UrlLoader};
pub use version::{
    GitCli, RemoteTagSource, UpdateCheck, UpdateCheckOutcome, VersionCheckOptions, VersionInfo,
    check_all_plugins_for_updates, check_for_updates, fetch_remote_tags, has_newer_version,
    normalize_version, sort_versions,
};
