//! Deep merge of TOML layers.
//!
//! The merge operates on raw [`toml::Value`] trees rather than deserialized
//! structs, so a key missing from an overlay never resets the base value.

use std::collections::HashMap;

/// Which configuration layer a value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigLayer {
    /// Compiled-in defaults (`defaults.toml`).
    Defaults,
    /// User-level configuration (`~/.ai-tool-sync/config.toml`).
    User,
    /// Workspace-level configuration (`{workspace}/.ai-tool-sync/config.toml`).
    Workspace,
    /// Environment variable fallback.
    Environment,
}

impl std::fmt::Display for ConfigLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Defaults => write!(f, "defaults"),
            Self::User => write!(f, "user (~/.ai-tool-sync/config.toml)"),
            Self::Workspace => write!(f, "workspace (.ai-tool-sync/config.toml)"),
            Self::Environment => write!(f, "environment variable"),
        }
    }
}

/// Tracks which layer set each leaf field, keyed by dotted path.
pub type FieldSources = HashMap<String, ConfigLayer>;

/// Deep-merge `overlay` into `base`, recording the layer for every leaf the
/// overlay sets.
///
/// Tables merge recursively. Scalars and arrays from the overlay replace the
/// base value.
pub fn deep_merge_tracking(
    base: &mut toml::Value,
    overlay: &toml::Value,
    prefix: &str,
    layer: ConfigLayer,
    sources: &mut FieldSources,
) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let path = join_path(prefix, key);
                match base_table.get_mut(key) {
                    Some(base_val) => {
                        deep_merge_tracking(base_val, overlay_val, &path, layer, sources);
                    },
                    None => {
                        record_leaves(overlay_val, &path, layer, sources);
                        base_table.insert(key.clone(), overlay_val.clone());
                    },
                }
            }
        },
        (base, overlay) => {
            *base = overlay.clone();
            record_leaves(overlay, prefix, layer, sources);
        },
    }
}

/// Mark every leaf under `val` as set by `layer`.
pub fn record_leaves(
    val: &toml::Value,
    prefix: &str,
    layer: ConfigLayer,
    sources: &mut FieldSources,
) {
    if let toml::Value::Table(table) = val {
        for (key, child) in table {
            record_leaves(child, &join_path(prefix, key), layer, sources);
        }
    } else {
        sources.insert(prefix.to_owned(), layer);
    }
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_owned()
    } else {
        format!("{prefix}.{key}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_scalar_replaces_and_is_tracked() {
        let mut base: toml::Value = toml::from_str(
            r#"
            [git]
            timeout_secs = 300
            depth = 1
        "#,
        )
        .unwrap();
        let overlay: toml::Value = toml::from_str(
            r#"
            [git]
            depth = 5
        "#,
        )
        .unwrap();

        let mut sources = FieldSources::new();
        deep_merge_tracking(&mut base, &overlay, "", ConfigLayer::User, &mut sources);

        assert_eq!(base["git"]["depth"].as_integer(), Some(5));
        assert_eq!(base["git"]["timeout_secs"].as_integer(), Some(300));
        assert_eq!(sources.get("git.depth"), Some(&ConfigLayer::User));
        assert!(!sources.contains_key("git.timeout_secs"));
    }

    #[test]
    fn overlay_new_table_is_inserted() {
        let mut base: toml::Value = toml::from_str("[git]\ndepth = 1").unwrap();
        let overlay: toml::Value = toml::from_str("[cache]\ndir = \"/tmp/x\"").unwrap();

        let mut sources = FieldSources::new();
        deep_merge_tracking(&mut base, &overlay, "", ConfigLayer::Workspace, &mut sources);

        assert_eq!(base["cache"]["dir"].as_str(), Some("/tmp/x"));
        assert_eq!(sources.get("cache.dir"), Some(&ConfigLayer::Workspace));
    }

    #[test]
    fn arrays_replace_rather_than_append() {
        let mut base: toml::Value = toml::from_str("[logging]\ndirectives = [\"a\"]").unwrap();
        let overlay: toml::Value = toml::from_str("[logging]\ndirectives = [\"b\"]").unwrap();

        let mut sources = FieldSources::new();
        deep_merge_tracking(&mut base, &overlay, "", ConfigLayer::User, &mut sources);

        let dirs = base["logging"]["directives"].as_array().unwrap();
        assert_eq!(dirs.len(), 1);
        assert_eq!(dirs[0].as_str(), Some("b"));
    }
}
