//! Remote version discovery.
//!
//! Tags are listed with `git ls-remote`, so no clone is needed. Ordering is
//! total: tags that normalise to semver sort first by semver precedence,
//! everything else follows in descending lexical order.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use semver::Version;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::{PluginCache, generate_plugin_id};
use crate::error::{PluginError, PluginResult};
use crate::git::command::run_git;
use crate::git::{DEFAULT_GIT_TIMEOUT, GitToken, git_available};
use crate::source::{SourceDescriptor, is_local_path, strip_ref};

/// Lists the tags of a remote repository.
#[async_trait]
pub trait RemoteTagSource: Send + Sync {
    /// Whether the backend can run at all. Checked before any network call.
    fn is_available(&self) -> bool;

    /// Every tag name on the remote, unsorted.
    async fn list_tags(
        &self,
        clone_url: &str,
        timeout: Duration,
        token: Option<&GitToken>,
    ) -> PluginResult<Vec<String>>;
}

/// [`RemoteTagSource`] backed by the `git` CLI.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitCli;

#[async_trait]
impl RemoteTagSource for GitCli {
    fn is_available(&self) -> bool {
        git_available()
    }

    async fn list_tags(
        &self,
        clone_url: &str,
        timeout: Duration,
        token: Option<&GitToken>,
    ) -> PluginResult<Vec<String>> {
        fetch_remote_tags(clone_url, timeout, token).await
    }
}

/// Run `git ls-remote --tags --refs <clone_url>` and return the tag names.
///
/// # Errors
///
/// Returns the errors of the underlying git invocation.
pub async fn fetch_remote_tags(
    clone_url: &str,
    timeout: Duration,
    token: Option<&GitToken>,
) -> PluginResult<Vec<String>> {
    let output =
        run_git(&["ls-remote", "--tags", "--refs", clone_url], None, timeout, token).await?;
    let tags = parse_ls_remote(&output);
    debug!(url = %clone_url, count = tags.len(), "Listed remote tags");
    Ok(tags)
}

/// Extract tag names from `git ls-remote` output, skipping peeled `^{}` lines.
#[must_use]
pub fn parse_ls_remote(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .filter_map(|reference| reference.strip_prefix("refs/tags/"))
        .filter(|tag| !tag.is_empty() && !tag.ends_with("^{}"))
        .map(str::to_owned)
        .collect()
}

/// Parse a tag as semver, accepting a `v` prefix and `1` / `1.2` shorthands.
#[must_use]
pub fn normalize_version(tag: &str) -> Option<Version> {
    let trimmed = tag.trim();
    let bare = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);
    // Shorthands are only padded without a pre-release, so date tags such as
    // `2024-05-01` stay non-semver.
    let padded = if bare.contains('-') {
        bare.to_owned()
    } else {
        let (core, build) = bare.split_at(bare.find('+').unwrap_or(bare.len()));
        match core.matches('.').count() {
            0 => format!("{core}.0.0{build}"),
            1 => format!("{core}.0{build}"),
            _ => bare.to_owned(),
        }
    };
    Version::parse(&padded).ok()
}

/// Newest-first comparison over arbitrary tags.
fn newest_first(a: &str, b: &str) -> Ordering {
    match (normalize_version(a), normalize_version(b)) {
        (Some(va), Some(vb)) => vb.cmp(&va).then_with(|| b.cmp(a)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => b.cmp(a),
    }
}

/// Sort tags newest first and drop duplicates. The head is the latest.
#[must_use]
pub fn sort_versions<S: AsRef<str>>(tags: &[S]) -> Vec<String> {
    let mut sorted: Vec<String> = tags.iter().map(|t| t.as_ref().to_owned()).collect();
    sorted.sort_by(|a, b| newest_first(a, b));
    sorted.dedup();
    sorted
}

/// Whether `latest` is newer than `current`.
///
/// - No `latest`: never.
/// - No `current`: always.
/// - Both semver: semver comparison.
/// - Otherwise: any difference counts as newer.
#[must_use]
pub fn has_newer_version(current: Option<&str>, latest: Option<&str>) -> bool {
    let Some(latest) = latest else {
        return false;
    };
    let Some(current) = current else {
        return true;
    };
    match (normalize_version(current), normalize_version(latest)) {
        (Some(c), Some(l)) => l > c,
        _ => current != latest,
    }
}

/// Current and available versions of one plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    /// Installed (or pinned) version.
    pub current_version: Option<String>,
    /// Newest remote tag.
    pub latest_version: Option<String>,
    /// Every remote tag, newest first.
    pub available_versions: Vec<String>,
    /// Whether `latest_version` is newer than `current_version`.
    pub has_update: bool,
}

/// Result of checking one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCheck {
    /// Source without any `#ref`.
    pub source: String,
    /// Cache id of the installed copy.
    pub plugin_id: String,
    /// Version details.
    pub versions: VersionInfo,
    /// Shortcut for `versions.has_update`.
    pub has_update: bool,
}

/// Per-source outcome of a batch check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCheckOutcome {
    /// The source that was checked.
    pub source: String,
    /// Present on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check: Option<UpdateCheck>,
    /// Present on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UpdateCheckOutcome {
    /// Whether the check succeeded.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.check.is_some()
    }
}

/// Knobs for version checks.
#[derive(Debug, Clone)]
pub struct VersionCheckOptions {
    /// Bound on each `git ls-remote`.
    pub timeout: Duration,
    /// Token for private remotes.
    pub token: Option<GitToken>,
    /// Prefer SSH clone URLs.
    pub use_ssh: bool,
}

impl Default for VersionCheckOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_GIT_TIMEOUT,
            token: None,
            use_ssh: false,
        }
    }
}

/// Check one source for a newer remote version.
///
/// The current version is the version of the most recently cached copy of
/// the same source, else the ref written in `source`.
///
/// # Errors
///
/// - [`PluginError::LocalSourceUnsupported`] for filesystem paths.
/// - [`PluginError::GitUnavailable`] if tags cannot be listed.
/// - [`PluginError::InvalidSource`] for malformed or URL sources.
/// - [`PluginError::NoVersionsFound`] if the remote has no tags.
///
/// The first three are raised before any network call.
pub async fn check_for_updates(
    cache: &PluginCache,
    tags: &dyn RemoteTagSource,
    source: &str,
    options: &VersionCheckOptions,
) -> PluginResult<UpdateCheck> {
    if is_local_path(source) {
        return Err(PluginError::LocalSourceUnsupported(source.to_owned()));
    }
    if !tags.is_available() {
        return Err(PluginError::GitUnavailable);
    }
    let SourceDescriptor::Git(git) = SourceDescriptor::parse(source, options.use_ssh)? else {
        return Err(PluginError::invalid_source(source, "version checks require a git source"));
    };
    let base = git.base_source().to_owned();

    let installed = cache
        .find_by_source(&base)
        .await
        .into_iter()
        .max_by_key(|e| e.cached_at);
    let plugin_id = installed.as_ref().map_or_else(
        || generate_plugin_id(source, git.git_ref.as_deref()),
        |e| e.id.clone(),
    );
    let current_version = installed
        .and_then(|e| e.version)
        .or_else(|| git.git_ref.clone());

    let remote = tags
        .list_tags(&git.clone_url, options.timeout, options.token.as_ref())
        .await?;
    if remote.is_empty() {
        return Err(PluginError::NoVersionsFound(base));
    }
    let available_versions = sort_versions(&remote);
    let latest_version = available_versions.first().cloned();
    let has_update = has_newer_version(current_version.as_deref(), latest_version.as_deref());

    debug!(
        source = %base,
        current = ?current_version,
        latest = ?latest_version,
        has_update,
        "Checked for updates"
    );

    Ok(UpdateCheck {
        source: base,
        plugin_id,
        has_update,
        versions: VersionInfo {
            current_version,
            latest_version,
            available_versions,
            has_update,
        },
    })
}

/// Check many sources concurrently. Failures are isolated per source.
///
/// `sources` defaults to the distinct sources (without refs) of every cached
/// plugin. Duplicates are checked once.
pub async fn check_all_plugins_for_updates(
    cache: &PluginCache,
    tags: &dyn RemoteTagSource,
    sources: Option<&[String]>,
    options: &VersionCheckOptions,
) -> Vec<UpdateCheckOutcome> {
    let targets: Vec<String> = match sources {
        Some(list) => {
            let mut seen = BTreeSet::new();
            list.iter()
                .filter(|s| seen.insert(s.as_str()))
                .cloned()
                .collect()
        },
        None => cache
            .list_cached()
            .await
            .iter()
            .map(|e| strip_ref(&e.source).to_owned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect(),
    };

    let checks = targets
        .iter()
        .map(|source| check_for_updates(cache, tags, source, options));
    let results = join_all(checks).await;

    let outcomes: Vec<UpdateCheckOutcome> = targets
        .into_iter()
        .zip(results)
        .map(|(source, result)| match result {
            Ok(check) => UpdateCheckOutcome {
                source,
                check: Some(check),
                error: None,
            },
            Err(e) => {
                warn!(source = %source, error = %e, "Update check failed");
                UpdateCheckOutcome {
                    source,
                    check: None,
                    error: Some(e.to_string()),
                }
            },
        })
        .collect();

    let updates = outcomes
        .iter()
        .filter(|o| o.check.as_ref().is_some_and(|c| c.has_update))
        .count();
    info!(checked = outcomes.len(), updates, "Checked plugins for updates");
    outcomes
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    use super::*;

    #[derive(Default)]
    struct FakeTags {
        tags: HashMap<String, Vec<String>>,
        calls: AtomicUsize,
        unavailable: bool,
    }

    impl FakeTags {
        fn with(mut self, url: &str, tags: &[&str]) -> Self {
            self.tags
                .insert(url.to_owned(), tags.iter().map(|t| (*t).to_owned()).collect());
            self
        }
    }

    #[async_trait]
    impl RemoteTagSource for FakeTags {
        fn is_available(&self) -> bool {
            !self.unavailable
        }

        async fn list_tags(
            &self,
            clone_url: &str,
            _timeout: Duration,
            _token: Option<&GitToken>,
        ) -> PluginResult<Vec<String>> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            self.tags
                .get(clone_url)
                .cloned()
                .ok_or_else(|| PluginError::GitCommandFailed {
                    command: "git ls-remote".into(),
                    stderr: "repository not found".into(),
                })
        }
    }

    async fn cache() -> (tempfile::TempDir, Arc<PluginCache>) {
        let dir = tempfile::tempdir().unwrap();
        let cache = PluginCache::open(dir.path()).await.unwrap();
        (dir, cache)
    }

    #[test]
    fn normalizes_common_tag_shapes() {
        assert_eq!(normalize_version("v1.2.3"), Some(Version::new(1, 2, 3)));
        assert_eq!(normalize_version("V2"), Some(Version::new(2, 0, 0)));
        assert_eq!(normalize_version("1.4"), Some(Version::new(1, 4, 0)));
        assert_eq!(normalize_version("v1.0.0-beta.1").unwrap().pre.as_str(), "beta.1");
        assert_eq!(normalize_version("2024-05-01"), None);
        assert_eq!(normalize_version("release-2024-01"), None);
        assert_eq!(normalize_version("latest"), None);
    }

    #[test]
    fn sorts_semver_then_lexical() {
        let sorted = sort_versions(&[
            "v1.2.0",
            "nightly",
            "v1.10.0",
            "2024-05-01",
            "v1.10.0",
            "v2.0.0-rc.1",
            "1.9",
        ]);
        assert_eq!(
            sorted,
            vec!["v2.0.0-rc.1", "v1.10.0", "1.9", "v1.2.0", "nightly", "2024-05-01"]
        );
    }

    #[test]
    fn newer_version_rules() {
        assert!(!has_newer_version(Some("v1.0.0"), None));
        assert!(has_newer_version(None, Some("v1.0.0")));
        assert!(has_newer_version(Some("v1.0.0"), Some("v1.1.0")));
        assert!(!has_newer_version(Some("v1.1.0"), Some("1.1")));
        assert!(!has_newer_version(Some("v2.0.0"), Some("v1.9.9")));
        assert!(has_newer_version(Some("nightly-a"), Some("nightly-b")));
        assert!(!has_newer_version(Some("nightly"), Some("nightly")));
    }

    #[test]
    fn parses_ls_remote_output() {
        let output = "\
abc123\trefs/tags/v1.0.0
def456\trefs/tags/v1.1.0
def456\trefs/tags/v1.1.0^{}
789abc\trefs/heads/main
";
        assert_eq!(parse_ls_remote(output), vec!["v1.0.0", "v1.1.0"]);
    }

    #[tokio::test]
    async fn local_path_fails_without_network() {
        let (_dir, cache) = cache().await;
        let tags = FakeTags::default();
        let err = check_for_updates(
            &cache,
            &tags,
            "./local/plugin",
            &VersionCheckOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("Local plugins cannot be updated"));
        assert_eq!(tags.calls.load(AtomicOrdering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_git_fails_before_network() {
        let (_dir, cache) = cache().await;
        let tags = FakeTags {
            unavailable: true,
            ..FakeTags::default()
        };
        let err = check_for_updates(
            &cache,
            &tags,
            "github:acme/rules",
            &VersionCheckOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PluginError::GitUnavailable));
        assert_eq!(tags.calls.load(AtomicOrdering::SeqCst), 0);
    }

    #[tokio::test]
    async fn url_sources_are_rejected() {
        let (_dir, cache) = cache().await;
        let tags = FakeTags::default();
        let err = check_for_updates(
            &cache,
            &tags,
            "https://example.com/rules/",
            &VersionCheckOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PluginError::InvalidSource { .. }));
    }

    #[tokio::test]
    async fn current_version_comes_from_cache() {
        let (_dir, cache) = cache().await;
        let path = cache.plugin_path("acme_rules_v1.0.0");
        std::fs::create_dir_all(&path).unwrap();
        cache
            .cache_plugin("github:acme/rules#v1.0.0", Some("v1.0.0"), &path, None)
            .await
            .unwrap();
        let tags = FakeTags::default().with(
            "https://github.com/acme/rules.git",
            &["v1.0.0", "v1.2.0", "v1.1.0"],
        );

        let check = check_for_updates(
            &cache,
            &tags,
            "github:acme/rules",
            &VersionCheckOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(check.source, "github:acme/rules");
        assert_eq!(check.plugin_id, "acme_rules_v1.0.0");
        assert_eq!(check.versions.current_version.as_deref(), Some("v1.0.0"));
        assert_eq!(check.versions.latest_version.as_deref(), Some("v1.2.0"));
        assert_eq!(check.versions.available_versions, vec!["v1.2.0", "v1.1.0", "v1.0.0"]);
        assert!(check.has_update);
    }

    #[tokio::test]
    async fn batch_isolates_failures() {
        let (_dir, cache) = cache().await;
        let tags = FakeTags::default()
            .with("https://github.com/acme/a.git", &["v1.0.0"])
            .with("https://github.com/acme/b.git", &["v2.0.0", "v1.0.0"])
            .with("https://github.com/acme/empty.git", &[]);
        let sources = vec![
            "github:acme/a#v1.0.0".to_owned(),
            "github:acme/b#v1.0.0".to_owned(),
            "github:acme/empty".to_owned(),
            "github:acme/b#v1.0.0".to_owned(),
        ];

        let outcomes =
            check_all_plugins_for_updates(
                &cache,
                &tags,
                Some(&sources),
                &VersionCheckOptions::default(),
            )
            .await;
        assert_eq!(outcomes.len(), 3);
        assert!(!outcomes[0].check.as_ref().unwrap().has_update);
        assert!(outcomes[1].check.as_ref().unwrap().has_update);
        assert!(!outcomes[2].is_ok());
        assert!(outcomes[2].error.as_ref().unwrap().contains("no versions found"));
    }

    #[tokio::test]
    async fn batch_defaults_to_cached_sources() {
        let (_dir, cache) = cache().await;
        for (source, version) in [
            ("github:acme/a#v1.0.0", "v1.0.0"),
            ("github:acme/a#v0.9.0", "v0.9.0"),
        ] {
            let path = cache.plugin_path(&generate_plugin_id(source, Some(version)));
            std::fs::create_dir_all(&path).unwrap();
            cache.cache_plugin(source, Some(version), &path, None).await.unwrap();
        }
        let tags = FakeTags::default().with("https://github.com/acme/a.git", &["v1.0.0"]);

        let outcomes =
            check_all_plugins_for_updates(&cache, &tags, None, &VersionCheckOptions::default())
                .await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].source, "github:acme/a");
        assert_eq!(tags.calls.load(AtomicOrdering::SeqCst), 1);
    }
}
