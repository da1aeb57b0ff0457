//! Index files describing a URL-hosted plugin.

use serde::Deserialize;
use toolsync_core::content::ContentKind;
use url::Url;

/// `<base>/index.json`: relative paths per content type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RootIndex {
    /// Rule files.
    pub rules: Vec<String>,
    /// Persona files.
    pub personas: Vec<String>,
    /// Command files.
    pub commands: Vec<String>,
    /// Hook files.
    pub hooks: Vec<String>,
}

impl RootIndex {
    /// Every listed path with its content type.
    pub fn entries(&self) -> impl Iterator<Item = (ContentKind, &str)> {
        [
            (ContentKind::Rule, &self.rules),
            (ContentKind::Persona, &self.personas),
            (ContentKind::Command, &self.commands),
            (ContentKind::Hook, &self.hooks),
        ]
        .into_iter()
        .flat_map(|(kind, list)| list.iter().map(move |p| (kind, p.as_str())))
    }
}

/// `<base>/<type>/index.json`: file names inside that directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DirIndex {
    /// File names relative to the directory.
    pub files: Vec<String>,
}

/// Whether an index entry is a plain relative path.
///
/// Rejects absolute paths, parent traversal, backslashes and anything that
/// parses with a scheme (`https://...`, `http:host/x`, `mailto:x`).
fn is_relative_entry(entry: &str) -> bool {
    let first = entry.split('/').next().unwrap_or_default();
    !entry.is_empty()
        && !entry.starts_with('/')
        && !first.contains(':')
        && !entry.contains('\\')
        && !entry.split('/').any(|segment| segment == "..")
}

/// Resolve an index entry against the plugin's base URL.
///
/// The joined URL must keep the base's scheme, host and port, and its path
/// must stay under the base path.
///
/// # Errors
///
/// A short reason suitable for `LoadResult::errors`.
pub fn resolve_entry(base: &Url, entry: &str) -> Result<Url, String> {
    if !is_relative_entry(entry) {
        return Err("index entry must be a relative path inside the plugin".to_owned());
    }
    let joined = base
        .join(entry)
        .map_err(|e| format!("invalid index entry: {e}"))?;
    let confined = joined.scheme() == base.scheme()
        && joined.host() == base.host()
        && joined.port_or_known_default() == base.port_or_known_default()
        && joined.path().starts_with(base.path());
    if confined {
        Ok(joined)
    } else {
        Err(format!("index entry resolves outside the plugin: {joined}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_index_with_missing_sections() {
        let index: RootIndex =
            serde_json::from_str(r#"{"rules": ["rules/a.md"], "hooks": ["hooks/h.yaml"]}"#)
                .unwrap();
        let entries: Vec<_> = index.entries().collect();
        assert_eq!(
            entries,
            vec![(ContentKind::Rule, "rules/a.md"), (ContentKind::Hook, "hooks/h.yaml")]
        );
    }

    #[test]
    fn dir_index_defaults_to_empty() {
        let index: DirIndex = serde_json::from_str("{}").unwrap();
        assert!(index.files.is_empty());
    }

    #[test]
    fn unsafe_entries_are_rejected() {
        let base = Url::parse("https://example.com/plugins/acme/").unwrap();
        assert_eq!(
            resolve_entry(&base, "rules/a.md").unwrap().as_str(),
            "https://example.com/plugins/acme/rules/a.md"
        );
        assert!(resolve_entry(&base, "a..b.md").is_ok());
        for bad in [
            "",
            "/etc/passwd",
            "../secret.md",
            "rules/../../x.md",
            "https://evil.example/x.md",
            "http:evil.example/x.md",
            "https:evil.example/x.md",
            "mailto:x",
            "//evil.example/x.md",
            "rules\\a.md",
        ] {
            assert!(resolve_entry(&base, bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn encoded_traversal_is_rejected() {
        let base = Url::parse("https://example.com/plugins/acme/").unwrap();
        assert!(resolve_entry(&base, "%2e%2e/other/x.md").is_err());
        assert!(resolve_entry(&base, "rules/%2E%2E/%2e%2e/x.md").is_err());
    }
}
