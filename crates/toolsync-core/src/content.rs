//! Typed content records produced by plugin loaders.
//!
//! Loaders never interpret file semantics themselves. They hand raw text to a
//! [`ContentParser`] together with the [`ContentKind`] derived from where the
//! file was found, and collect the results into a [`LoadResult`].

use std::path::Path;

use serde::{Deserialize, Serialize};

/// File extensions that identify plugin content files.
pub const CONTENT_EXTENSIONS: &[&str] = &["md", "mdc", "markdown", "txt", "yaml", "yml", "json"];

/// The four kinds of content a plugin can ship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    /// Coding rules.
    Rule,
    /// Agent personas.
    Persona,
    /// Slash commands.
    Command,
    /// Lifecycle hooks.
    Hook,
}

impl ContentKind {
    /// Every kind, in load order.
    pub const ALL: [Self; 4] = [Self::Rule, Self::Persona, Self::Command, Self::Hook];

    /// Canonical directory name for this kind inside a plugin.
    #[must_use]
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Rule => "rules",
            Self::Persona => "personas",
            Self::Command => "commands",
            Self::Hook => "hooks",
        }
    }

    /// All directory names that hold this kind (canonical first).
    #[must_use]
    pub fn dir_names(self) -> &'static [&'static str] {
        match self {
            Self::Rule => &["rules"],
            Self::Persona => &["personas", "agents"],
            Self::Command => &["commands"],
            Self::Hook => &["hooks"],
        }
    }

    /// Classify a URL or path by its segments.
    ///
    /// `/rules/` → rule, `/personas/` or `/agents/` → persona,
    /// `/commands/` → command, `/hooks/` → hook. Anything else is a rule.
    #[must_use]
    pub fn from_path(path: &str) -> Self {
        let segments: Vec<&str> = path.split('/').collect();
        // The last segment is the file name, never a directory marker.
        let dirs = &segments[..segments.len().saturating_sub(1)];
        for seg in dirs.iter().rev() {
            match *seg {
                "rules" => return Self::Rule,
                "personas" | "agents" => return Self::Persona,
                "commands" => return Self::Command,
                "hooks" => return Self::Hook,
                _ => {},
            }
        }
        Self::Rule
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Rule => "rule",
            Self::Persona => "persona",
            Self::Command => "command",
            Self::Hook => "hook",
        };
        f.write_str(s)
    }
}

/// Whether a path names a plugin content file (by extension).
#[must_use]
pub fn is_content_file(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            CONTENT_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

/// A single parsed content record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedContent {
    /// Which kind of content this is.
    pub kind: ContentKind,
    /// Display name (frontmatter `name`, else the file stem).
    pub name: String,
    /// Path relative to the plugin root, or the full URL for remote files.
    pub path: String,
    /// Frontmatter (or the whole document for YAML/JSON files) as a JSON object.
    pub frontmatter: serde_json::Value,
    /// Markdown body following the frontmatter.
    pub body: String,
}

/// A per-file failure captured during a load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadError {
    /// File path or URL that failed.
    pub path: String,
    /// What went wrong.
    pub message: String,
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Everything a loader produced for one source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadResult {
    /// Parsed rules.
    pub rules: Vec<ParsedContent>,
    /// Parsed personas.
    pub personas: Vec<ParsedContent>,
    /// Parsed commands.
    pub commands: Vec<ParsedContent>,
    /// Parsed hooks.
    pub hooks: Vec<ParsedContent>,
    /// Per-file errors that did not abort the load.
    pub errors: Vec<LoadError>,
    /// The source string this result was loaded from.
    pub source: String,
}

impl LoadResult {
    /// Create an empty result for `source`.
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }

    /// Route a parsed record into the list for its kind.
    pub fn push(&mut self, content: ParsedContent) {
        match content.kind {
            ContentKind::Rule => self.rules.push(content),
            ContentKind::Persona => self.personas.push(content),
            ContentKind::Command => self.commands.push(content),
            ContentKind::Hook => self.hooks.push(content),
        }
    }

    /// Record a per-file failure.
    pub fn push_error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(LoadError {
            path: path.into(),
            message: message.into(),
        });
    }

    /// Records of the given kind.
    #[must_use]
    pub fn of_kind(&self, kind: ContentKind) -> &[ParsedContent] {
        match kind {
            ContentKind::Rule => &self.rules,
            ContentKind::Persona => &self.personas,
            ContentKind::Command => &self.commands,
            ContentKind::Hook => &self.hooks,
        }
    }

    /// Total number of parsed records across all kinds.
    #[must_use]
    pub fn total(&self) -> usize {
        self.rules
            .len()
            .saturating_add(self.personas.len())
            .saturating_add(self.commands.len())
            .saturating_add(self.hooks.len())
    }
}

/// Turns raw fetched text into a typed record.
///
/// Implementations must be pure: no I/O, no dependence on the source.
pub trait ContentParser: Send + Sync {
    /// Parse one file.
    ///
    /// # Errors
    ///
    /// Returns a human-readable message when the file cannot be parsed. The
    /// loader records it in [`LoadResult::errors`] and moves on.
    fn parse(&self, kind: ContentKind, path: &str, raw: &str) -> Result<ParsedContent, String>;
}

/// Default parser: YAML frontmatter + markdown body, or whole-document
/// YAML/JSON for `.yaml`/`.yml`/`.json` files.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrontmatterParser;

impl ContentParser for FrontmatterParser {
    fn parse(&self, kind: ContentKind, path: &str, raw: &str) -> Result<ParsedContent, String> {
        let ext = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        let (frontmatter, body) = match ext.as_deref() {
            Some("json") => {
                let value: serde_json::Value =
                    serde_json::from_str(raw).map_err(|e| format!("invalid JSON: {e}"))?;
                (value, String::new())
            },
            Some("yaml" | "yml") => (yaml_to_json(raw)?, String::new()),
            _ => match split_frontmatter(raw) {
                Some((yaml, body)) => (yaml_to_json(yaml)?, body.to_string()),
                None => (
                    serde_json::Value::Object(serde_json::Map::new()),
                    raw.to_string(),
                ),
            },
        };

        if !frontmatter.is_object() {
            return Err("frontmatter must be a mapping".to_string());
        }

        let name = frontmatter
            .get("name")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .or_else(|| {
                Path::new(path)
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| path.to_string());

        Ok(ParsedContent {
            kind,
            name,
            path: path.to_string(),
            frontmatter,
            body,
        })
    }
}

/// Split `---`-delimited frontmatter from the body.
///
/// Returns `None` when the document does not open with a `---` line.
fn split_frontmatter(raw: &str) -> Option<(&str, &str)> {
    let trimmed = raw.trim_start_matches('\u{feff}');
    let rest = trimmed
        .strip_prefix("---\n")
        .or_else(|| trimmed.strip_prefix("---\r\n"))?;

    if let Some(body) = rest.strip_prefix("---") {
        return Some(("", body.trim_start_matches(['\r', '\n'])));
    }

    let close = rest.find("\n---")?;
    let yaml = &rest[..close];
    let after = &rest[close.saturating_add(4)..];
    Some((yaml, after.trim_start_matches(['\r', '\n'])))
}

fn yaml_to_json(yaml: &str) -> Result<serde_json::Value, String> {
    if yaml.trim().is_empty() {
        return Ok(serde_json::Value::Object(serde_json::Map::new()));
    }
    let value: serde_yaml::Value =
        serde_yaml::from_str(yaml).map_err(|e| format!("invalid YAML frontmatter: {e}"))?;
    serde_json::to_value(value).map_err(|e| format!("unsupported frontmatter value: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_from_path_segments() {
        assert_eq!(
            ContentKind::from_path("https://x.dev/pack/rules/style.md"),
            ContentKind::Rule
        );
        assert_eq!(
            ContentKind::from_path("https://x.dev/pack/agents/reviewer.md"),
            ContentKind::Persona
        );
        assert_eq!(
            ContentKind::from_path("https://x.dev/personas/a.md"),
            ContentKind::Persona
        );
        assert_eq!(
            ContentKind::from_path("https://x.dev/commands/deploy.md"),
            ContentKind::Command
        );
        assert_eq!(
            ContentKind::from_path("https://x.dev/hooks/pre.json"),
            ContentKind::Hook
        );
        assert_eq!(
            ContentKind::from_path("https://x.dev/misc/readme.md"),
            ContentKind::Rule
        );
        // A file literally named "hooks" is not a directory marker.
        assert_eq!(ContentKind::from_path("https://x.dev/hooks"), ContentKind::Rule);
    }

    #[test]
    fn content_extension_detection() {
        assert!(is_content_file("a/b/rule.md"));
        assert!(is_content_file("a/b/rule.MDC"));
        assert!(is_content_file("hook.yaml"));
        assert!(!is_content_file("script.sh"));
        assert!(!is_content_file("noext"));
    }

    #[test]
    fn parse_markdown_with_frontmatter() {
        let raw = "---\nname: style\nglobs: [\"*.rs\"]\n---\n# Style\nUse rustfmt.\n";
        let parsed = FrontmatterParser
            .parse(ContentKind::Rule, "rules/style.md", raw)
            .unwrap();
        assert_eq!(parsed.name, "style");
        assert_eq!(parsed.frontmatter["globs"][0], "*.rs");
        assert_eq!(parsed.body, "# Style\nUse rustfmt.\n");
    }

    #[test]
    fn parse_markdown_without_frontmatter_uses_stem() {
        let parsed = FrontmatterParser
            .parse(ContentKind::Command, "commands/deploy.md", "Run deploy.")
            .unwrap();
        assert_eq!(parsed.name, "deploy");
        assert_eq!(parsed.body, "Run deploy.");
        assert!(parsed.frontmatter.as_object().unwrap().is_empty());
    }

    #[test]
    fn parse_json_hook() {
        let parsed = FrontmatterParser
            .parse(
                ContentKind::Hook,
                "hooks/lint.json",
                r#"{"name":"lint","event":"pre-commit"}"#,
            )
            .unwrap();
        assert_eq!(parsed.name, "lint");
        assert_eq!(parsed.frontmatter["event"], "pre-commit");
    }

    #[test]
    fn parse_rejects_bad_yaml() {
        let raw = "---\nname: [unterminated\n---\nbody";
        let err = FrontmatterParser
            .parse(ContentKind::Rule, "rules/bad.md", raw)
            .unwrap_err();
        assert!(err.contains("invalid YAML"), "got: {err}");
    }

    #[test]
    fn parse_rejects_scalar_frontmatter() {
        let err = FrontmatterParser
            .parse(ContentKind::Rule, "rules/x.yaml", "just a string")
            .unwrap_err();
        assert!(err.contains("mapping"));
    }

    #[test]
    fn load_result_routes_by_kind() {
        let mut result = LoadResult::new("github:acme/rules");
        for kind in ContentKind::ALL {
            result.push(
                FrontmatterParser
                    .parse(kind, &format!("{}/a.md", kind.dir_name()), "x")
                    .unwrap(),
            );
        }
        result.push_error("rules/broken.md", "boom");
        assert_eq!(result.total(), 4);
        assert_eq!(result.of_kind(ContentKind::Hook).len(), 1);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.source, "github:acme/rules");
    }
}
