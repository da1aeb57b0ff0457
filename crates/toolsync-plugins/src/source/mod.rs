//! Plugin source specifiers.
//!
//! Parses the strings users put in their config into a [`SourceDescriptor`]
//! without touching the network:
//!
//! - `github:owner/repo[/subpath][#ref]` (also `gitlab:` and `bitbucket:`)
//! - `git:host/owner/repo[/subpath][#ref]`
//! - `git:https://host/owner/repo.git[#ref]` (or `git:ssh://...`)
//! - `git@host:owner/repo[.git][#ref]`
//! - `https://host/owner/repo.git[#ref]`
//! - `url:https://...` or any other bare `http(s)://` URL (URL fetcher)

pub mod validate;
#[cfg(test)]
mod tests;

use std::fmt;

use serde::Serialize;

use self::validate::{validate_component, validate_git_ref, validate_host, validate_subpath};
use crate::error::{PluginError, PluginResult};

/// Which fetcher handles a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Shallow git fetch.
    Git,
    /// Plain HTTP(S) fetch.
    Url,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Git => write!(f, "git"),
            Self::Url => write!(f, "url"),
        }
    }
}

/// Known git hosting services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GitHost {
    /// github.com
    GitHub,
    /// gitlab.com
    GitLab,
    /// bitbucket.org
    Bitbucket,
    /// Any other host.
    Generic,
}

impl GitHost {
    /// Classify a hostname.
    #[must_use]
    pub fn from_host(host: &str) -> Self {
        match host.to_ascii_lowercase().as_str() {
            "github.com" => Self::GitHub,
            "gitlab.com" => Self::GitLab,
            "bitbucket.org" => Self::Bitbucket,
            _ => Self::Generic,
        }
    }
}

/// Shorthand prefixes and the fixed host each resolves to.
const SHORTHANDS: &[(&str, GitHost, &str)] = &[
    ("github:", GitHost::GitHub, "github.com"),
    ("gitlab:", GitHost::GitLab, "gitlab.com"),
    ("bitbucket:", GitHost::Bitbucket, "bitbucket.org"),
];

/// A git-hosted plugin source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitSource {
    /// Hosting service.
    pub kind: GitHost,
    /// Hostname (with port, if any).
    pub host: String,
    /// Owner, organisation or group path.
    pub owner: String,
    /// Repository name without `.git`.
    pub repo: String,
    /// Tag, branch or commit after `#`.
    pub git_ref: Option<String>,
    /// Repository-relative directory holding the content.
    pub subpath: Option<String>,
    /// URL handed to `git`.
    pub clone_url: String,
    /// Whether `clone_url` is an SSH URL.
    pub use_ssh: bool,
    /// The specifier as written.
    pub raw: String,
}

impl GitSource {
    /// The specifier with any `#ref` removed.
    #[must_use]
    pub fn base_source(&self) -> &str {
        strip_ref(&self.raw)
    }

    /// The specifier pinned to `version`.
    #[must_use]
    pub fn pinned(&self, version: &str) -> String {
        format!("{}#{version}", self.base_source())
    }
}

/// A plain HTTP(S) plugin source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlSource {
    /// Parsed target URL.
    pub url: url::Url,
    /// The specifier as written.
    pub raw: String,
}

/// A parsed plugin source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceDescriptor {
    /// Fetched with git.
    Git(GitSource),
    /// Fetched over HTTP.
    Url(UrlSource),
}

impl SourceDescriptor {
    /// Parse a source specifier.
    ///
    /// `use_ssh` selects SSH clone URLs for shorthand and `git:host/...`
    /// forms. SCP-style `git@host:...` sources always use SSH.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::InvalidSource`] for malformed specifiers, unknown
    /// schemes, or components that fail validation.
    pub fn parse(source: &str, use_ssh: bool) -> PluginResult<Self> {
        let raw = source.trim();
        if raw.is_empty() {
            return Err(PluginError::invalid_source(source, "empty source"));
        }

        if let Some(rest) = raw.strip_prefix("url:") {
            return parse_url(raw, rest);
        }
        for (prefix, kind, host) in SHORTHANDS {
            if let Some(rest) = raw.strip_prefix(prefix) {
                let (path, git_ref) = split_ref(raw, rest)?;
                let (owner, repo, subpath) = split_owner_repo(raw, path)?;
                return finish_git(raw, *kind, host, owner, repo, subpath, git_ref, use_ssh, None);
            }
        }
        if let Some(rest) = raw.strip_prefix("git:") {
            if rest.contains("://") {
                return parse_git_url(raw, rest);
            }
            return parse_host_path(raw, rest, use_ssh);
        }
        if raw.starts_with("git@") {
            return parse_scp(raw);
        }
        if raw.starts_with("https://") && looks_like_git_url(strip_ref(raw)) {
            return parse_git_url(raw, raw);
        }
        if raw.starts_with("https://") || raw.starts_with("http://") {
            return parse_url(raw, raw);
        }

        Err(PluginError::invalid_source(
            raw,
            concat!(
                "unrecognized scheme; expected github:, gitlab:, bitbucket:, ",
                "git:, git@, url: or an http(s) URL",
            ),
        ))
    }

    /// Which fetcher handles this source.
    #[must_use]
    pub fn provider(&self) -> Provider {
        match self {
            Self::Git(_) => Provider::Git,
            Self::Url(_) => Provider::Url,
        }
    }

    /// The specifier as written.
    #[must_use]
    pub fn raw(&self) -> &str {
        match self {
            Self::Git(g) => &g.raw,
            Self::Url(u) => &u.raw,
        }
    }

    /// The git source, if this is one.
    #[must_use]
    pub fn as_git(&self) -> Option<&GitSource> {
        match self {
            Self::Git(g) => Some(g),
            Self::Url(_) => None,
        }
    }
}

impl fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.raw())
    }
}

/// Parse a source specifier, returning `None` on any failure.
#[must_use]
pub fn parse_source(source: &str, use_ssh: bool) -> Option<SourceDescriptor> {
    SourceDescriptor::parse(source, use_ssh).ok()
}

/// Whether the git fetcher accepts `source`.
#[must_use]
pub fn can_load_git(source: &str) -> bool {
    matches!(parse_source(source, false), Some(SourceDescriptor::Git(_)))
}

/// Whether the URL fetcher accepts `source`.
#[must_use]
pub fn can_load_url(source: &str) -> bool {
    matches!(parse_source(source, false), Some(SourceDescriptor::Url(_)))
}

/// Whether `source` names a filesystem path rather than a remote.
#[must_use]
pub fn is_local_path(source: &str) -> bool {
    let s = source.trim();
    if s == "." || s == ".." {
        return true;
    }
    if ["./", "../", "/", "~", "file:", ".\\", "..\\"]
        .iter()
        .any(|p| s.starts_with(p))
    {
        return true;
    }
    // Windows drive prefix: `C:\` or `C:/`
    let bytes = s.as_bytes();
    bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && matches!(bytes[2], b'\\' | b'/')
}

/// Remove a trailing `#ref` from a specifier.
#[must_use]
pub fn strip_ref(source: &str) -> &str {
    source.split_once('#').map_or(source, |(base, _)| base)
}

/// Split `value#ref`. An empty ref is rejected.
fn split_ref<'a>(raw: &str, s: &'a str) -> PluginResult<(&'a str, Option<&'a str>)> {
    match s.split_once('#') {
        Some((_, "")) => Err(PluginError::invalid_source(raw, "empty ref after '#'")),
        Some((value, git_ref)) => Ok((value, Some(git_ref))),
        None => Ok((s, None)),
    }
}

/// Split `owner/repo[/subpath...]` into its parts.
fn split_owner_repo<'a>(
    raw: &str,
    path: &'a str,
) -> PluginResult<(&'a str, &'a str, Vec<&'a str>)> {
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    match segments.as_slice() {
        [owner, repo, rest @ ..] if !owner.is_empty() && !repo.is_empty() => {
            Ok((*owner, (*repo).trim_end_matches(".git"), rest.to_vec()))
        },
        _ => Err(PluginError::invalid_source(raw, "expected owner/repo")),
    }
}

/// `https://host/.../repo.git[/...]`
fn looks_like_git_url(url: &str) -> bool {
    url.split('/').skip(3).any(|segment| {
        std::path::Path::new(segment)
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("git"))
    })
}

/// `git:host/owner/repo[/subpath][#ref]`
fn parse_host_path(raw: &str, rest: &str, use_ssh: bool) -> PluginResult<SourceDescriptor> {
    let (path, git_ref) = split_ref(raw, rest)?;
    let Some((host, remainder)) = path.split_once('/') else {
        return Err(PluginError::invalid_source(raw, "expected host/owner/repo"));
    };
    validate_host(host)?;
    let host = host.to_ascii_lowercase();
    let (owner, repo, subpath) = split_owner_repo(raw, remainder)?;
    finish_git(
        raw,
        GitHost::from_host(&host),
        &host,
        owner,
        repo,
        subpath,
        git_ref,
        use_ssh,
        None,
    )
}

/// `git@host:owner/repo[.git][/subpath][#ref]`
fn parse_scp(raw: &str) -> PluginResult<SourceDescriptor> {
    let (body, git_ref) = split_ref(raw, raw)?;
    let after_at = body.strip_prefix("git@").unwrap_or(body);
    let Some((host, path)) = after_at.split_once(':') else {
        return Err(PluginError::invalid_source(raw, "expected git@host:owner/repo"));
    };
    validate_host(host)?;
    let host = host.to_ascii_lowercase();
    let (owner, repo, subpath) = split_owner_repo(raw, path)?;
    finish_git(
        raw,
        GitHost::from_host(&host),
        &host,
        owner,
        repo,
        subpath,
        git_ref,
        true,
        None,
    )
}

/// `https://host/group/.../repo.git[/subpath][#ref]` or `ssh://...`
fn parse_git_url(raw: &str, rest: &str) -> PluginResult<SourceDescriptor> {
    let (url_part, git_ref) = split_ref(raw, rest)?;
    let parsed = url::Url::parse(url_part)
        .map_err(|e| PluginError::invalid_source(raw, format!("invalid URL: {e}")))?;

    let use_ssh = match parsed.scheme() {
        "https" => false,
        "ssh" => true,
        other => {
            return Err(PluginError::invalid_source(
                raw,
                format!("blocked URL scheme '{other}'; only https:// and ssh:// are allowed"),
            ));
        },
    };

    let Some(host_name) = parsed.host_str() else {
        return Err(PluginError::invalid_source(raw, "URL has no host"));
    };
    let host = match parsed.port() {
        Some(port) => format!("{host_name}:{port}"),
        None => host_name.to_owned(),
    };
    validate_host(&host)?;

    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();

    let repo_idx = segments
        .iter()
        .position(|seg| seg.to_ascii_lowercase().ends_with(".git"))
        .unwrap_or(1);
    if repo_idx == 0 || repo_idx >= segments.len() {
        return Err(PluginError::invalid_source(raw, "expected host/owner/repo"));
    }
    let owner = segments[..repo_idx].join("/");
    let repo = segments[repo_idx].trim_end_matches(".git");
    let subpath = segments[repo_idx.saturating_add(1)..].to_vec();

    let clone_url = if use_ssh {
        let user = match parsed.username() {
            "" => String::new(),
            name => format!("{name}@"),
        };
        format!("ssh://{user}{host}/{owner}/{repo}.git")
    } else {
        format!("https://{host}/{owner}/{repo}.git")
    };

    finish_git(
        raw,
        GitHost::from_host(host_name),
        &host,
        &owner,
        repo,
        subpath,
        git_ref,
        use_ssh,
        Some(clone_url),
    )
}

/// `url:<http(s) URL>` or a bare `http(s)://` URL.
fn parse_url(raw: &str, url_str: &str) -> PluginResult<SourceDescriptor> {
    let url = url::Url::parse(url_str)
        .map_err(|e| PluginError::invalid_source(raw, format!("invalid URL: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(PluginError::invalid_source(
            raw,
            "url: sources must use http:// or https://",
        ));
    }
    if url.host_str().is_none() {
        return Err(PluginError::invalid_source(raw, "URL has no host"));
    }
    Ok(SourceDescriptor::Url(UrlSource {
        url,
        raw: raw.to_owned(),
    }))
}

#[allow(clippy::too_many_arguments)]
fn finish_git(
    raw: &str,
    kind: GitHost,
    host: &str,
    owner: &str,
    repo: &str,
    subpath: Vec<&str>,
    git_ref: Option<&str>,
    use_ssh: bool,
    clone_url: Option<String>,
) -> PluginResult<SourceDescriptor> {
    for part in owner.split('/') {
        validate_component(part, "owner")?;
    }
    validate_component(repo, "repo")?;

    let subpath = if subpath.is_empty() {
        None
    } else {
        let joined = subpath.join("/");
        validate_subpath(&joined)?;
        Some(joined)
    };

    if let Some(r) = git_ref {
        validate_git_ref(r)?;
    }

    let clone_url = clone_url.unwrap_or_else(|| {
        if use_ssh {
            format!("git@{host}:{owner}/{repo}.git")
        } else {
            format!("https://{host}/{owner}/{repo}.git")
        }
    });

    Ok(SourceDescriptor::Git(GitSource {
        kind,
        host: host.to_owned(),
        owner: owner.to_owned(),
        repo: repo.to_owned(),
        git_ref: git_ref.map(str::to_owned),
        subpath,
        clone_url,
        use_ssh,
        raw: raw.to_owned(),
    }))
}
