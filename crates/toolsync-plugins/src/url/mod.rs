//! URL fetcher.
//!
//! A URL pointing at a content file (`.md`, `.yaml`, ...) is loaded as a
//! single record typed by its path. Anything else is treated as a plugin
//! root and discovered through `index.json` files:
//!
//! 1. `<base>/index.json` listing paths per content type, or
//! 2. `<base>/<type>/index.json` listing file names, tried for every type.
//!
//! Listed files are fetched concurrently. A failing file is recorded in
//! [`LoadResult::errors`] without aborting its siblings.

pub mod cache;
pub mod index;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use reqwest::StatusCode;
use reqwest::header::{ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use toolsync_core::content::{ContentKind, ContentParser, LoadResult, is_content_file};
use tracing::{debug, info};
use url::Url;

pub use self::cache::{CacheTier, DEFAULT_URL_TTL, UrlCache, UrlCacheEntry};
use self::index::{DirIndex, RootIndex, resolve_entry};
use crate::error::{PluginError, PluginResult};
use crate::loader::{LoadOptions, Loader};
use crate::source::{SourceDescriptor, can_load_url};

/// Default bound on each HTTP request.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Default `User-Agent` header.
pub const DEFAULT_USER_AGENT: &str = "ai-tool-sync";

const INDEX_FILE: &str = "index.json";

/// Knobs for [`UrlFetcher::new`].
#[derive(Debug, Clone)]
pub struct UrlFetchOptions {
    /// How long a fetched body is served without revalidation.
    pub cache_ttl: Duration,
    /// Bound on each request.
    pub timeout: Duration,
    /// `User-Agent` header.
    pub user_agent: String,
    /// Enables the disk tier of the URL cache.
    pub disk_cache_dir: Option<PathBuf>,
}

impl Default for UrlFetchOptions {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_URL_TTL,
            timeout: DEFAULT_HTTP_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            disk_cache_dir: None,
        }
    }
}

/// Where a fetched body came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOrigin {
    /// Fresh `200` response.
    Network,
    /// Fresh memory-tier hit.
    Memory,
    /// Fresh disk-tier hit.
    Disk,
    /// Stale entry confirmed by a `304`.
    Revalidated,
}

/// A fetched body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlFetch {
    /// Response body.
    pub content: String,
    /// Where it came from.
    pub origin: FetchOrigin,
}

/// HTTP fetcher with a two-tier cache and conditional revalidation.
#[derive(Debug)]
pub struct UrlFetcher {
    client: reqwest::Client,
    cache: UrlCache,
    timeout: Duration,
}

impl UrlFetcher {
    /// Build a fetcher.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Network`] if the HTTP client cannot be built.
    pub fn new(options: UrlFetchOptions) -> PluginResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(options.user_agent)
            .redirect(reqwest::redirect::Policy::limited(10))
            .timeout(options.timeout)
            .build()
            .map_err(|e| PluginError::Network {
                url: String::new(),
                message: format!("failed to create HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            cache: UrlCache::new(options.cache_ttl, options.disk_cache_dir),
            timeout: options.timeout,
        })
    }

    /// The owned URL cache.
    #[must_use]
    pub fn cache(&self) -> &UrlCache {
        &self.cache
    }

    /// Fetch `url` as text.
    ///
    /// A fresh cache entry is returned without touching the network unless
    /// `force_refresh` is set. A stale entry is revalidated with
    /// `If-None-Match` / `If-Modified-Since`. With `optional`, a `404` yields
    /// `Ok(None)`.
    ///
    /// # Errors
    ///
    /// - [`PluginError::Timeout`] when the request exceeds the timeout.
    /// - [`PluginError::Http`] for any other non-success status.
    /// - [`PluginError::Network`] for connection failures.
    pub async fn fetch_text(
        &self,
        url: &str,
        optional: bool,
        force_refresh: bool,
    ) -> PluginResult<Option<UrlFetch>> {
        let cached = self.cache.get(url).await;
        if !force_refresh
            && let Some((entry, tier)) = &cached
            && self.cache.is_fresh(entry)
        {
            debug!(url, tier = ?tier, "URL cache hit");
            let origin = match tier {
                CacheTier::Memory => FetchOrigin::Memory,
                CacheTier::Disk => FetchOrigin::Disk,
            };
            return Ok(Some(UrlFetch {
                content: entry.content.clone(),
                origin,
            }));
        }

        let mut request = self.client.get(url);
        if !force_refresh && let Some((entry, _)) = &cached {
            if let Some(etag) = &entry.etag {
                request = request.header(IF_NONE_MATCH, etag);
            }
            if let Some(modified) = &entry.last_modified {
                request = request.header(IF_MODIFIED_SINCE, modified);
            }
        }

        debug!(url, revalidating = cached.is_some(), "Fetching URL");
        let response = request.send().await.map_err(|e| self.request_error(url, &e))?;
        let status = response.status();

        if status == StatusCode::NOT_MODIFIED
            && let Some(entry) = self.cache.refresh(url).await
        {
            debug!(url, "URL revalidated (304)");
            return Ok(Some(UrlFetch {
                content: entry.content,
                origin: FetchOrigin::Revalidated,
            }));
        }
        if status == StatusCode::NOT_FOUND && optional {
            debug!(url, "Optional URL not found");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(PluginError::Http {
                url: url.to_owned(),
                status: status.as_u16(),
            });
        }

        let header = |name: reqwest::header::HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned)
        };
        let etag = header(ETAG);
        let last_modified = header(LAST_MODIFIED);
        let content = response.text().await.map_err(|e| self.request_error(url, &e))?;

        self.cache
            .put(
                url,
                UrlCacheEntry {
                    content: content.clone(),
                    fetched_at: Utc::now(),
                    etag,
                    last_modified,
                },
            )
            .await;

        Ok(Some(UrlFetch {
            content,
            origin: FetchOrigin::Network,
        }))
    }

    /// Load every content record reachable from a URL source.
    ///
    /// # Errors
    ///
    /// Returns an error if `source` is not a URL source, or if a single-file
    /// source cannot be fetched. Directory-style failures are recorded per
    /// file instead.
    pub async fn load(
        &self,
        source: &str,
        parser: &dyn ContentParser,
        force_refresh: bool,
    ) -> PluginResult<LoadResult> {
        let SourceDescriptor::Url(url_source) = SourceDescriptor::parse(source, false)? else {
            return Err(PluginError::invalid_source(source, "not a URL source"));
        };
        let url = url_source.url;
        let mut result = LoadResult::new(source);

        if is_single_file(&url) {
            let kind = ContentKind::from_path(url.path());
            let fetched = self
                .fetch_text(url.as_str(), false, force_refresh)
                .await?
                .ok_or_else(|| PluginError::NotFound(url.to_string()))?;
            match parser.parse(kind, url.as_str(), &fetched.content) {
                Ok(parsed) => result.push(parsed),
                Err(message) => result.push_error(url.as_str(), message),
            }
            return Ok(result);
        }

        let base = directory_base(&url);
        let Some(entries) = self.discover(&base, force_refresh, &mut result).await else {
            result.push_error(
                base.as_str(),
                "no index.json found at the plugin root or in any content directory",
            );
            return Ok(result);
        };

        let mut targets = Vec::new();
        for (kind, rel) in entries {
            match resolve_entry(&base, &rel) {
                Ok(file_url) => targets.push((kind, file_url)),
                Err(reason) => result.push_error(rel, reason),
            }
        }

        let fetches = targets
            .iter()
            .map(|(_, file_url)| self.fetch_text(file_url.as_str(), false, force_refresh));
        let outcomes = join_all(fetches).await;
        for ((kind, file_url), outcome) in targets.iter().zip(outcomes) {
            match outcome {
                Ok(Some(fetched)) => match parser.parse(*kind, file_url.as_str(), &fetched.content)
                {
                    Ok(parsed) => result.push(parsed),
                    Err(message) => result.push_error(file_url.as_str(), message),
                },
                Ok(None) => result.push_error(file_url.as_str(), "not found"),
                Err(e) => result.push_error(file_url.as_str(), e.to_string()),
            }
        }

        info!(source, parsed = result.total(), errors = result.errors.len(), "Loaded URL plugin");
        Ok(result)
    }

    /// Find the files a directory-style source lists. `None` when no index
    /// exists anywhere.
    async fn discover(
        &self,
        base: &Url,
        force_refresh: bool,
        result: &mut LoadResult,
    ) -> Option<Vec<(ContentKind, String)>> {
        if let Ok(root_url) = base.join(INDEX_FILE) {
            match self.fetch_text(root_url.as_str(), true, force_refresh).await {
                Ok(Some(fetched)) => match serde_json::from_str::<RootIndex>(&fetched.content) {
                    Ok(index) => {
                        return Some(index.entries().map(|(k, p)| (k, p.to_owned())).collect());
                    },
                    Err(e) => {
                        result.push_error(root_url.as_str(), format!("invalid index.json: {e}"));
                    },
                },
                Ok(None) => {},
                Err(e) => debug!(url = %root_url, error = %e, "Root index fetch failed"),
            }
        }

        let candidates: Vec<(ContentKind, Url)> = ContentKind::ALL
            .into_iter()
            .filter_map(|kind| {
                base.join(&format!("{}/{INDEX_FILE}", kind.dir_name()))
                    .ok()
                    .map(|u| (kind, u))
            })
            .collect();
        let outcomes = join_all(
            candidates
                .iter()
                .map(|(_, u)| self.fetch_text(u.as_str(), true, force_refresh)),
        )
        .await;

        let mut found = false;
        let mut entries = Vec::new();
        for ((kind, index_url), outcome) in candidates.iter().zip(outcomes) {
            match outcome {
                Ok(Some(fetched)) => match serde_json::from_str::<DirIndex>(&fetched.content) {
                    Ok(index) => {
                        found = true;
                        entries.extend(
                            index
                                .files
                                .into_iter()
                                .map(|file| (*kind, format!("{}/{file}", kind.dir_name()))),
                        );
                    },
                    Err(e) => {
                        result.push_error(index_url.as_str(), format!("invalid index.json: {e}"));
                    },
                },
                Ok(None) => {},
                Err(e) => result.push_error(index_url.as_str(), e.to_string()),
            }
        }
        found.then_some(entries)
    }

    fn request_error(&self, url: &str, e: &reqwest::Error) -> PluginError {
        if e.is_timeout() {
            PluginError::Timeout {
                operation: format!("GET {url}"),
                timeout: self.timeout,
            }
        } else {
            PluginError::Network {
                url: url.to_owned(),
                message: e.to_string(),
            }
        }
    }
}

/// Whether `url` names a single content file rather than a plugin root.
fn is_single_file(url: &Url) -> bool {
    let last = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or_default();
    is_content_file(last) && !last.eq_ignore_ascii_case(INDEX_FILE)
}

/// `url` with a trailing slash so relative joins stay inside it.
fn directory_base(url: &Url) -> Url {
    let mut base = url.clone();
    base.set_query(None);
    base.set_fragment(None);
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base
}

/// [`Loader`] for URL sources.
#[derive(Clone)]
pub struct UrlLoader {
    fetcher: Arc<UrlFetcher>,
    parser: Arc<dyn ContentParser>,
}

impl UrlLoader {
    /// Create a loader over a shared fetcher.
    #[must_use]
    pub fn new(fetcher: Arc<UrlFetcher>, parser: Arc<dyn ContentParser>) -> Self {
        Self { fetcher, parser }
    }
}

impl std::fmt::Debug for UrlLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlLoader")
            .field("fetcher", &self.fetcher)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Loader for UrlLoader {
    fn name(&self) -> &'static str {
        "url"
    }

    fn can_load(&self, source: &str) -> bool {
        can_load_url(source)
    }

    async fn load(&self, source: &str, options: &LoadOptions) -> PluginResult<LoadResult> {
        self.fetcher
            .load(source, self.parser.as_ref(), options.force_refresh)
            .await
    }
}
