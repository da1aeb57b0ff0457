//! Deterministic plugin ids and content hashes.

use sha2::{Digest, Sha256};

/// Provider prefixes removed before normalisation.
const PROVIDER_PREFIXES: &[&str] = &[
    "claude-plugin:",
    "github:",
    "gitlab:",
    "bitbucket:",
    "git:",
    "url:",
    "npm:",
    "local:",
];

/// Derive the cache id for `source` at `version`.
///
/// The id doubles as the directory name under the cache root, so it never
/// contains path separators and never starts with `.` or `_`.
#[must_use]
pub fn generate_plugin_id(source: &str, version: Option<&str>) -> String {
    let mut s = source.trim();

    for prefix in PROVIDER_PREFIXES {
        if let Some(rest) = s.strip_prefix(prefix) {
            s = rest;
            if *prefix == "claude-plugin:" {
                s = s.strip_prefix("npm:").unwrap_or(s);
            }
            break;
        }
    }
    for scheme in ["https://", "http://"] {
        if let Some(rest) = s.strip_prefix(scheme) {
            s = rest;
            break;
        }
    }
    s = s.strip_prefix('@').unwrap_or(s);

    let mut id = collapse_underscores(s.chars().map(|c| match c {
        '/' | ':' | '@' | '#' | '\\' => '_',
        c if c.is_control() || c.is_whitespace() => '_',
        c => c,
    }));

    if let Some(version) = version.filter(|v| !v.is_empty()) {
        let suffix = sanitize_version(version);
        if !id.split('_').any(|token| token == suffix) {
            if !id.is_empty() {
                id.push('_');
            }
            id.push_str(&suffix);
        }
    }

    let id = id.trim_start_matches(['.', '_']);
    if id.is_empty() {
        "plugin".to_owned()
    } else {
        id.to_owned()
    }
}

/// Map a version to `[A-Za-z0-9._-]`.
fn sanitize_version(version: &str) -> String {
    version
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Collapse runs of `_` and trim them from both ends.
fn collapse_underscores(chars: impl Iterator<Item = char>) -> String {
    let mut out = String::new();
    for c in chars {
        if c == '_' && (out.is_empty() || out.ends_with('_')) {
            continue;
        }
        out.push(c);
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

/// First 16 hex characters of the SHA-256 of `bytes`.
#[must_use]
pub fn content_hash(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut hex = hex::encode(digest);
    hex.truncate(16);
    hex
}
