//! Content discovery inside a fetched repository.

use std::path::Path;

use toolsync_core::content::{ContentKind, ContentParser, LoadResult, is_content_file};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.')
}

/// Walk every content directory under `root` and parse what it holds.
///
/// Paths handed to the parser are relative to `root` and `/`-separated.
/// Dot-directories and symlinks are skipped. Per-file failures land in
/// `result.errors`.
pub(crate) fn discover_content(root: &Path, parser: &dyn ContentParser, result: &mut LoadResult) {
    for kind in ContentKind::ALL {
        for dir_name in kind.dir_names() {
            let dir = root.join(dir_name);
            match std::fs::symlink_metadata(&dir) {
                Ok(meta) if meta.file_type().is_symlink() => {
                    result.push_error(*dir_name, "content directory is a symlink; not followed");
                    continue;
                },
                Ok(meta) if meta.is_dir() => {},
                _ => continue,
            }
            let walker = WalkDir::new(&dir)
                .follow_links(false)
                .follow_root_links(false)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| !is_hidden(e));

            for entry in walker {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        let path = e
                            .path()
                            .map_or_else(|| dir.display().to_string(), |p| p.display().to_string());
                        result.push_error(path, e.to_string());
                        continue;
                    },
                };
                if !entry.file_type().is_file() {
                    continue;
                }
                let Some(rel) = relative_slash_path(root, entry.path()) else {
                    continue;
                };
                if !is_content_file(&rel) {
                    continue;
                }
                match std::fs::read_to_string(entry.path()) {
                    Ok(raw) => match parser.parse(kind, &rel, &raw) {
                        Ok(parsed) => result.push(parsed),
                        Err(message) => result.push_error(rel, message),
                    },
                    Err(e) => result.push_error(rel, format!("failed to read: {e}")),
                }
            }
        }
    }
    debug!(
        root = %root.display(),
        parsed = result.total(),
        errors = result.errors.len(),
        "Discovered plugin content"
    );
}

fn relative_slash_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use toolsync_core::content::FrontmatterParser;

    use super::*;

    fn write(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    #[test]
    fn discovers_each_kind() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "rules/style.md", "---\nname: style\n---\nUse tabs.");
        write(root, "rules/nested/deep.mdc", "deep");
        write(root, "agents/reviewer.md", "review");
        write(root, "commands/deploy.md", "deploy");
        write(root, "hooks/pre.yaml", "name: pre\nevent: PreToolUse\n");
        write(root, "rules/image.png", "binary");
        write(root, "README.md", "not content");

        let mut result = LoadResult::new("github:acme/rules");
        discover_content(root, &FrontmatterParser, &mut result);

        assert_eq!(result.rules.len(), 2);
        assert_eq!(result.rules[1].path, "rules/style.md");
        assert_eq!(result.personas.len(), 1);
        assert_eq!(result.commands.len(), 1);
        assert_eq!(result.hooks.len(), 1);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn skips_hidden_directories() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "rules/.local-overrides/mine.md", "private");
        write(root, "rules/.git/HEAD.md", "nope");
        write(root, "rules/ok.md", "ok");

        let mut result = LoadResult::new("x");
        discover_content(root, &FrontmatterParser, &mut result);
        assert_eq!(result.rules.len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_content_is_not_followed() {
        let outside = tempfile::tempdir().unwrap();
        write(outside.path(), "secret.md", "top secret");
        write(outside.path(), "nested/other.md", "also secret");

        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::os::unix::fs::symlink(outside.path(), root.join("rules")).unwrap();
        write(root, "agents/reviewer.md", "review");
        std::os::unix::fs::symlink(outside.path().join("nested"), root.join("agents/linked"))
            .unwrap();
        std::os::unix::fs::symlink(outside.path().join("secret.md"), root.join("agents/leak.md"))
            .unwrap();

        let mut result = LoadResult::new("x");
        discover_content(root, &FrontmatterParser, &mut result);
        assert!(result.rules.is_empty());
        assert_eq!(result.personas.len(), 1);
        assert_eq!(result.personas[0].path, "agents/reviewer.md");
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].path, "rules");
    }

    #[test]
    fn parse_failures_are_recorded() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "rules/bad.json", "{ nope");
        write(dir.path(), "rules/good.md", "fine");

        let mut result = LoadResult::new("x");
        discover_content(dir.path(), &FrontmatterParser, &mut result);
        assert_eq!(result.rules.len(), 1);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].path, "rules/bad.json");
    }
}
