//! Environment variable fallbacks.
//!
//! Env vars are a **fallback**, not an override: they only apply to fields
//! that no config file set.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::merge::{ConfigLayer, FieldSources};

/// The kind of TOML value an env var is coerced into.
#[derive(Clone, Copy)]
enum EnvKind {
    Str,
    Int,
    Bool,
}

/// Mapping from environment variable name to config field path.
struct EnvMapping {
    var_name: &'static str,
    field_path: &'static str,
    kind: EnvKind,
}

const ENV_MAPPINGS: &[EnvMapping] = &[
    EnvMapping {
        var_name: "AI_TOOL_SYNC_CACHE_DIR",
        field_path: "cache.dir",
        kind: EnvKind::Str,
    },
    EnvMapping {
        var_name: "AI_TOOL_SYNC_CACHE_TTL",
        field_path: "cache.ttl_secs",
        kind: EnvKind::Int,
    },
    EnvMapping {
        var_name: "AI_TOOL_SYNC_GIT_TIMEOUT",
        field_path: "git.timeout_secs",
        kind: EnvKind::Int,
    },
    EnvMapping {
        var_name: "AI_TOOL_SYNC_USE_SSH",
        field_path: "git.use_ssh",
        kind: EnvKind::Bool,
    },
    EnvMapping {
        var_name: "AI_TOOL_SYNC_LOG_LEVEL",
        field_path: "logging.level",
        kind: EnvKind::Str,
    },
];

/// Snapshot the process environment.
#[must_use]
pub fn collect_env_vars() -> HashMap<String, String> {
    std::env::vars().collect()
}

/// Apply environment variable fallbacks to fields that were not set by any
/// config file layer. Values that fail to coerce are skipped with a warning.
///
/// Returns the number of env vars applied.
pub fn apply_env_fallbacks<S: ::std::hash::BuildHasher>(
    merged: &mut toml::Value,
    sources: &mut FieldSources,
    env_vars: &HashMap<String, String, S>,
) -> usize {
    let mut count: usize = 0;

    for mapping in ENV_MAPPINGS {
        let set_by_file = sources
            .get(mapping.field_path)
            .is_some_and(|layer| *layer != ConfigLayer::Defaults);
        if set_by_file {
            continue;
        }

        let Some(raw) = env_vars.get(mapping.var_name) else {
            continue;
        };

        let Some(value) = coerce(mapping.kind, raw) else {
            warn!(
                var = mapping.var_name,
                value = %raw,
                "ignoring env var with unparseable value"
            );
            continue;
        };

        debug!(
            var = mapping.var_name,
            field = mapping.field_path,
            "applying env var fallback"
        );
        set_field(merged, mapping.field_path, value);
        sources.insert(mapping.field_path.to_owned(), ConfigLayer::Environment);
        count = count.saturating_add(1);
    }

    count
}

fn coerce(kind: EnvKind, raw: &str) -> Option<toml::Value> {
    match kind {
        EnvKind::Str => Some(toml::Value::String(raw.to_owned())),
        EnvKind::Int => raw.trim().parse::<i64>().ok().map(toml::Value::Integer),
        EnvKind::Bool => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(toml::Value::Boolean(true)),
            "0" | "false" | "no" | "off" => Some(toml::Value::Boolean(false)),
            _ => None,
        },
    }
}

/// Set a value at a dotted path, creating intermediate tables as needed.
fn set_field(root: &mut toml::Value, path: &str, value: toml::Value) {
    let mut segments: Vec<&str> = path.split('.').collect();
    let Some(leaf) = segments.pop() else {
        return;
    };

    let mut current = root;
    for segment in segments {
        let Some(table) = current.as_table_mut() else {
            return;
        };
        current = table
            .entry(segment.to_owned())
            .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
    }

    if let Some(table) = current.as_table_mut() {
        table.insert(leaf.to_owned(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn fallback_applies_over_defaults() {
        let mut merged: toml::Value = toml::from_str("[git]\ntimeout_secs = 300").unwrap();
        let mut sources = FieldSources::new();
        sources.insert("git.timeout_secs".into(), ConfigLayer::Defaults);

        let applied = apply_env_fallbacks(
            &mut merged,
            &mut sources,
            &env(&[("AI_TOOL_SYNC_GIT_TIMEOUT", "60")]),
        );

        assert_eq!(applied, 1);
        assert_eq!(merged["git"]["timeout_secs"].as_integer(), Some(60));
        assert_eq!(
            sources.get("git.timeout_secs"),
            Some(&ConfigLayer::Environment)
        );
    }

    #[test]
    fn fallback_does_not_override_file_values() {
        let mut merged: toml::Value = toml::from_str("[logging]\nlevel = \"warn\"").unwrap();
        let mut sources = FieldSources::new();
        sources.insert("logging.level".into(), ConfigLayer::User);

        let applied = apply_env_fallbacks(
            &mut merged,
            &mut sources,
            &env(&[("AI_TOOL_SYNC_LOG_LEVEL", "trace")]),
        );

        assert_eq!(applied, 0);
        assert_eq!(merged["logging"]["level"].as_str(), Some("warn"));
    }

    #[test]
    fn fallback_creates_missing_tables_and_coerces_bools() {
        let mut merged = toml::Value::Table(toml::map::Map::new());
        let mut sources = FieldSources::new();

        apply_env_fallbacks(
            &mut merged,
            &mut sources,
            &env(&[("AI_TOOL_SYNC_USE_SSH", "yes")]),
        );

        assert_eq!(merged["git"]["use_ssh"].as_bool(), Some(true));
    }

    #[test]
    fn unparseable_values_are_skipped() {
        let mut merged: toml::Value = toml::from_str("[cache]\nttl_secs = 10").unwrap();
        let mut sources = FieldSources::new();

        let applied = apply_env_fallbacks(
            &mut merged,
            &mut sources,
            &env(&[("AI_TOOL_SYNC_CACHE_TTL", "soon")]),
        );

        assert_eq!(applied, 0);
        assert_eq!(merged["cache"]["ttl_secs"].as_integer(), Some(10));
    }
}
