//! Finds config files and folds them into one [`Config`].
//!
//! Precedence, lowest first: embedded `defaults.toml`, the user file
//! `~/.ai-tool-sync/config.toml`, the project file
//! `<workspace>/.ai-tool-sync/config.toml`. Environment variables fill only
//! fields that no file set. The result is validated before it is returned.

use std::io;
use std::path::Path;

use toolsync_core::dirs::{HOME_ENV_VAR, ToolSyncHome, WorkspaceDir};
use tracing::{debug, info};

use crate::env::{apply_env_fallbacks, collect_env_vars};
use crate::error::{ConfigError, ConfigResult};
use crate::merge::{ConfigLayer, FieldSources, deep_merge_tracking, record_leaves};
use crate::types::Config;
use crate::validate;

const DEFAULTS_TOML: &str = include_str!("defaults.toml");

/// Config files larger than this are refused unread.
const MAX_CONFIG_BYTES: u64 = 1_048_576;

/// A loaded configuration together with where each value came from.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// The final configuration.
    pub config: Config,
    /// Which layer set each leaf field, keyed by dotted path.
    pub field_sources: FieldSources,
    /// Config files that were found and merged, in merge order.
    pub loaded_files: Vec<String>,
}

/// Merge state while walking the layers.
struct Layering {
    tree: toml::Value,
    sources: FieldSources,
    files: Vec<String>,
}

impl Layering {
    fn from_defaults() -> ConfigResult<Self> {
        let tree = parse(DEFAULTS_TOML, "<embedded defaults>")?;
        let mut sources = FieldSources::new();
        record_leaves(&tree, "", ConfigLayer::Defaults, &mut sources);
        Ok(Self {
            tree,
            sources,
            files: Vec::new(),
        })
    }

    /// Merge `path` over the tree when it exists.
    fn overlay(&mut self, layer: ConfigLayer, path: &Path) -> ConfigResult<()> {
        let Some(overlay) = read_optional(path)? else {
            debug!(path = %path.display(), ?layer, "no config file");
            return Ok(());
        };
        deep_merge_tracking(&mut self.tree, &overlay, "", layer, &mut self.sources);
        self.files.push(path.display().to_string());
        info!(path = %path.display(), ?layer, "merged config file");
        Ok(())
    }

    fn finish(mut self) -> ConfigResult<ResolvedConfig> {
        let env_vars = collect_env_vars();
        let filled = apply_env_fallbacks(&mut self.tree, &mut self.sources, &env_vars);
        if filled > 0 {
            debug!(fields = filled, "filled unset fields from the environment");
        }

        let config = into_config(self.tree, "<merged config>")?;
        Ok(ResolvedConfig {
            config,
            field_sources: self.sources,
            loaded_files: self.files,
        })
    }
}

/// Load the configuration with layered file precedence.
///
/// `workspace_root` is the project root; `None` skips the project layer.
/// `home_override` is the `.ai-tool-sync` directory itself and bypasses the
/// `AI_TOOL_SYNC_HOME` lookup.
///
/// # Errors
///
/// Returns a [`ConfigError`] when a file cannot be read or parsed, when no
/// home directory can be found, or when the merged result is invalid.
pub fn load(
    workspace_root: Option<&Path>,
    home_override: Option<&Path>,
) -> ConfigResult<ResolvedConfig> {
    let home = match home_override {
        Some(dir) => ToolSyncHome::from_path(dir),
        None => ToolSyncHome::resolve().map_err(home_error)?,
    };

    let mut layering = Layering::from_defaults()?;
    layering.overlay(ConfigLayer::User, &home.config_path())?;
    if let Some(root) = workspace_root {
        layering.overlay(
            ConfigLayer::Workspace,
            &WorkspaceDir::from_path(root).config_path(),
        )?;
    }
    layering.finish()
}

/// Load one file on its own, without defaults or environment fallbacks.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file is missing, unreadable, malformed
/// or invalid.
pub fn load_file(path: &Path) -> ConfigResult<Config> {
    let tree = read_optional(path)?.ok_or_else(|| ConfigError::ReadError {
        path: path.display().to_string(),
        source: io::Error::from(io::ErrorKind::NotFound),
    })?;
    into_config(tree, &path.display().to_string())
}

fn home_error(e: io::Error) -> ConfigError {
    match e.kind() {
        io::ErrorKind::InvalidInput => ConfigError::ValidationError {
            field: HOME_ENV_VAR.to_owned(),
            message: e.to_string(),
        },
        _ => ConfigError::NoHomeDir,
    }
}

fn parse(text: &str, origin: &str) -> ConfigResult<toml::Value> {
    toml::from_str(text).map_err(|source| ConfigError::ParseError {
        path: origin.to_owned(),
        source,
    })
}

fn into_config(tree: toml::Value, origin: &str) -> ConfigResult<Config> {
    let config: Config = tree
        .try_into()
        .map_err(|source| ConfigError::ParseError {
            path: origin.to_owned(),
            source,
        })?;
    validate::validate(&config)?;
    Ok(config)
}

/// `Ok(None)` for a missing file; size is checked before reading.
fn read_optional(path: &Path) -> ConfigResult<Option<toml::Value>> {
    let read_error = |source: io::Error| ConfigError::ReadError {
        path: path.display().to_string(),
        source,
    };

    let size = match std::fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(read_error(e)),
    };
    if size > MAX_CONFIG_BYTES {
        return Err(ConfigError::ValidationError {
            field: path.display().to_string(),
            message: format!("config file is {size} bytes; the limit is {MAX_CONFIG_BYTES}"),
        });
    }

    let text = std::fs::read_to_string(path).map_err(read_error)?;
    parse(&text, &path.display().to_string()).map(Some)
}
