//! ai-tool-sync CLI - remote plugin management.
//!
//! Fetches plugins from git hosts and plain URLs into the local cache,
//! checks them for newer tags and swaps versions in place.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use toolsync_config::Config;
use toolsync_core::dirs::{ToolSyncHome, WorkspaceDir};
use toolsync_telemetry::{LogConfig, LogFormat, LogTarget, setup_logging};

mod commands;
mod context;
mod formatter;
mod theme;

use commands::{cache, plugin};
use context::CliContext;
use formatter::OutputFormat;

/// ai-tool-sync - remote plugins for AI tool configuration
#[derive(Parser)]
#[command(name = "ai-tool-sync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format: pretty (default) or json
    #[arg(long, global = true, default_value = "pretty")]
    format: String,

    /// Project root (defaults to the nearest directory with `.ai-tool-sync/` or `.git`)
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage remote plugins
    Plugin {
        #[command(subcommand)]
        command: PluginCommands,
    },

    /// Inspect and maintain the plugin cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

#[derive(Subcommand)]
enum PluginCommands {
    /// Fetch a plugin and load its content
    Add {
        /// Plugin source (`github:owner/repo#v1.0.0`, `git@host:o/r.git`, `https://...`)
        source: String,
        /// Refetch even if a fresh copy is cached
        #[arg(long)]
        force: bool,
        /// Clone over SSH instead of HTTPS
        #[arg(long)]
        ssh: bool,
    },
    /// List cached plugins
    List,
    /// Remove a cached plugin
    Remove {
        /// Plugin source as it was added
        source: String,
        /// Cached version to remove
        #[arg(long)]
        version: Option<String>,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Check cached plugins for newer tags
    Outdated {
        /// Sources to check (defaults to every cached git plugin)
        sources: Vec<String>,
    },
    /// Update a cached plugin, keeping `.local-overrides/`
    Update {
        /// Plugin source
        source: String,
        /// Version to install (defaults to the newest tag)
        #[arg(long)]
        to: Option<String>,
    },
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Show cache location and size
    Info,
    /// Delete every cached plugin
    Clear {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
        /// Also clear cached URL responses
        #[arg(long)]
        urls: bool,
    },
    /// Reconcile the cache manifest with the filesystem and prune expired URL responses
    Verify,
}

/// Logging settings from `[logging]`, with `--verbose` forcing `debug`.
///
/// `logs_dir` is only used when `[logging] file` is set.
fn log_config(config: Option<&Config>, verbose: bool, logs_dir: Option<&Path>) -> LogConfig {
    let mut lc = match config {
        Some(cfg) => {
            let format = cfg.logging.format.parse().unwrap_or(LogFormat::Compact);
            let mut lc = cfg
                .logging
                .directives
                .iter()
                .fold(LogConfig::new(cfg.logging.level.clone()).with_format(format), |lc, d| {
                    lc.with_directive(d.clone())
                });
            if cfg.logging.file
                && let Some(dir) = logs_dir
            {
                lc = lc.with_target(LogTarget::Directory(dir.to_path_buf()));
            }
            lc
        },
        None => LogConfig::new("info").with_format(LogFormat::Compact),
    };
    if verbose {
        "debug".clone_into(&mut lc.level);
    }
    lc
}

/// Log directory of the home `[cache] dir` points at, or the default home.
fn logs_dir(config: &Config) -> Option<PathBuf> {
    let home = match &config.cache.dir {
        Some(dir) => ToolSyncHome::from_path(dir.clone()),
        None => ToolSyncHome::resolve().ok()?,
    };
    Some(home.logs_dir())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let workspace_root = match &cli.workspace {
        Some(dir) => dir.clone(),
        None => {
            let cwd = std::env::current_dir().context("failed to get current directory")?;
            WorkspaceDir::detect(&cwd).root().to_path_buf()
        },
    };
    let resolved = Config::load(Some(workspace_root.as_path()));

    let config = resolved.as_ref().ok().map(|r| &r.config);
    let logs = config.and_then(logs_dir);
    if let Err(e) = setup_logging(&log_config(config, cli.verbose, logs.as_deref())) {
        eprintln!("Failed to initialize logging: {e}");
    }

    let resolved = resolved.context("failed to load configuration")?;
    tracing::debug!(files = ?resolved.loaded_files, "Loaded configuration");
    let ctx = CliContext::open(resolved.config).await?;
    let format = OutputFormat::parse(&cli.format);

    match cli.command {
        Commands::Plugin { command } => handle_plugin(&ctx, command, format).await,
        Commands::Cache { command } => handle_cache(&ctx, command, format).await,
    }
}

async fn handle_plugin(
    ctx: &CliContext,
    command: PluginCommands,
    format: OutputFormat,
) -> Result<()> {
    match command {
        PluginCommands::Add { source, force, ssh } => {
            plugin::add_plugin(ctx, &source, force, ssh, format).await
        },
        PluginCommands::List => plugin::list_plugins(ctx, format).await,
        PluginCommands::Remove { source, version, yes } => {
            plugin::remove_plugin(ctx, &source, version.as_deref(), yes).await
        },
        PluginCommands::Outdated { sources } => {
            plugin::outdated_plugins(ctx, &sources, format).await
        },
        PluginCommands::Update { source, to } => plugin::update(ctx, &source, to, format).await,
    }
}

async fn handle_cache(
    ctx: &CliContext,
    command: CacheCommands,
    format: OutputFormat,
) -> Result<()> {
    match command {
        CacheCommands::Info => cache::cache_info(ctx, format).await,
        CacheCommands::Clear { yes, urls } => cache::clear_cache(ctx, yes, urls).await,
        CacheCommands::Verify => cache::verify_cache(ctx, format).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_nested_commands() {
        let cli = Cli::try_parse_from([
            "ai-tool-sync",
            "--format",
            "json",
            "plugin",
            "remove",
            "github:acme/rules",
            "--version",
            "v1.0.0",
            "-y",
        ])
        .unwrap();
        assert_eq!(cli.format, "json");
        match cli.command {
            Commands::Plugin {
                command: PluginCommands::Remove { source, version, yes },
            } => {
                assert_eq!(source, "github:acme/rules");
                assert_eq!(version.as_deref(), Some("v1.0.0"));
                assert!(yes);
            },
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn verbose_forces_debug() {
        let mut config = Config::default();
        config.logging.format = "json".into();
        config.logging.directives = vec!["toolsync_plugins=trace".into()];

        let lc = log_config(Some(&config), true, None);
        assert_eq!(lc.level, "debug");
        assert_eq!(lc.format, LogFormat::Json);
        assert_eq!(lc.directives, vec!["toolsync_plugins=trace".to_owned()]);
        assert_eq!(lc.target, LogTarget::Stderr);

        assert_eq!(log_config(None, false, None).level, "info");
    }

    #[test]
    fn file_logging_targets_home_logs() {
        let mut config = Config::default();
        config.logging.file = true;
        config.cache.dir = Some(PathBuf::from("/tmp/ats-home"));

        let dir = logs_dir(&config).unwrap();
        assert_eq!(dir, PathBuf::from("/tmp/ats-home/logs"));
        let lc = log_config(Some(&config), false, Some(&dir));
        assert_eq!(lc.target, LogTarget::Directory(dir));
    }
}
