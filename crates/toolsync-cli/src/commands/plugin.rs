//! Plugin commands: add, list, remove, outdated and update.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use toolsync_core::content::ContentKind;
use toolsync_plugins::{
    GitCli, LoadOptions, UpdateOptions, UpdateState, check_all_plugins_for_updates, git_available,
    update_plugin,
};

use crate::context::CliContext;
use crate::formatter::{OutputFormat, print_json};
use crate::theme::Theme;

/// Bail when `git` is missing from `PATH`.
fn require_git() -> anyhow::Result<()> {
    if !git_available() {
        bail!("git is not installed or not on PATH; install git to manage remote plugins");
    }
    Ok(())
}

pub(crate) async fn add_plugin(
    ctx: &CliContext,
    source: &str,
    force: bool,
    ssh: bool,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let loader = ctx.plugin_loader()?;
    let options = LoadOptions {
        force_refresh: force,
        use_ssh: ssh || ctx.config.git.use_ssh,
    };
    if !format.is_json() {
        println!("{}", Theme::info(&format!("Loading {source}")));
    }

    let result = loader
        .load(source, &options)
        .await
        .with_context(|| format!("failed to load plugin from {source}"))?;

    if format.is_json() {
        return print_json(&result);
    }

    for kind in ContentKind::ALL {
        let count = result.of_kind(kind).len();
        if count > 0 {
            println!("{}", Theme::kv(kind.dir_name(), &count.to_string()));
        }
    }
    for error in &result.errors {
        println!("{}", Theme::warning(&error.to_string()));
    }
    if result.total() == 0 {
        println!("{}", Theme::warning("No content found"));
    } else {
        println!(
            "{}",
            Theme::success(&format!("Loaded {} item(s) from {source}", result.total()))
        );
    }
    Ok(())
}

pub(crate) async fn list_plugins(ctx: &CliContext, format: OutputFormat) -> anyhow::Result<()> {
    let entries = ctx.cache.list_cached().await;
    if format.is_json() {
        return print_json(&entries);
    }
    if entries.is_empty() {
        println!("{}", Theme::info("No plugins cached"));
        return Ok(());
    }

    println!("{}", Theme::header("Cached Plugins"));
    println!("  {:<32} {:<12} {:<16} SOURCE", "ID", "VERSION", "CACHED");
    println!("{}", Theme::separator());
    for entry in &entries {
        println!(
            "  {:<32} {:<12} {:<16} {}",
            entry.id,
            Theme::version(entry.version.as_deref()),
            Theme::timestamp(&entry.cached_at),
            Theme::dimmed(&entry.source)
        );
    }
    println!("\n{}", Theme::dimmed(&format!("{} plugin(s)", entries.len())));
    Ok(())
}

pub(crate) async fn remove_plugin(
    ctx: &CliContext,
    source: &str,
    version: Option<&str>,
    yes: bool,
) -> anyhow::Result<()> {
    let Some(entry) = ctx.cache.get_cache_entry(source, version).await else {
        bail!("{source} is not cached");
    };

    if !yes {
        let confirm = Confirm::new()
            .with_prompt(format!("Remove {} ({})?", entry.id, entry.path.display()))
            .default(false)
            .interact()?;
        if !confirm {
            println!("{}", Theme::info("Aborted."));
            return Ok(());
        }
    }

    let removed = ctx
        .cache
        .invalidate(source, version)
        .await
        .with_context(|| format!("failed to remove {}", entry.id))?;
    if removed {
        println!("{}", Theme::success(&format!("Removed '{}'", entry.id)));
    } else {
        println!("{}", Theme::warning(&format!("'{}' was already gone", entry.id)));
    }
    Ok(())
}

pub(crate) async fn outdated_plugins(
    ctx: &CliContext,
    sources: &[String],
    format: OutputFormat,
) -> anyhow::Result<()> {
    require_git()?;

    let sources = (!sources.is_empty()).then_some(sources);
    let outcomes =
        check_all_plugins_for_updates(&ctx.cache, &GitCli, sources, &ctx.version_options()).await;
    if format.is_json() {
        return print_json(&outcomes);
    }
    if outcomes.is_empty() {
        println!("{}", Theme::info("No cached git plugins to check"));
        return Ok(());
    }

    println!("{}", Theme::header("Plugin Versions"));
    println!("  {:<40} {:<12} {:<12}", "SOURCE", "CURRENT", "LATEST");
    println!("{}", Theme::separator());
    let mut updates = 0usize;
    for outcome in &outcomes {
        match (&outcome.check, &outcome.error) {
            (Some(check), _) => {
                let latest = Theme::version(check.versions.latest_version.as_deref());
                let marker = if check.has_update {
                    updates = updates.saturating_add(1);
                    Theme::warning("update available")
                } else {
                    Theme::success("up to date")
                };
                println!(
                    "  {:<40} {:<12} {:<12} {marker}",
                    check.source,
                    Theme::version(check.versions.current_version.as_deref()),
                    latest
                );
            },
            (None, error) => {
                let reason = error.as_deref().unwrap_or("unknown error");
                println!("  {:<40} {}", outcome.source, Theme::error(reason));
            },
        }
    }
    println!(
        "\n{}",
        Theme::dimmed(&format!("{updates} of {} plugin(s) can be updated", outcomes.len()))
    );
    Ok(())
}

fn spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        pb.set_style(style);
    }
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

pub(crate) async fn update(
    ctx: &CliContext,
    source: &str,
    to: Option<String>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    require_git()?;

    let pb = (!format.is_json()).then(spinner);
    let observer = pb.clone();
    let options = UpdateOptions {
        target_version: to,
        fetch: ctx.git_options(),
        progress: Some(Arc::new(move |state: UpdateState| {
            if let Some(pb) = &observer {
                match state {
                    UpdateState::Active(stage) => pb.set_message(format!("{stage}")),
                    UpdateState::Failed { stage } => {
                        pb.set_message(format!("failed at {stage}, rolling back"));
                    },
                }
            }
        })),
    };

    let outcome = update_plugin(&ctx.cache, &ctx.git_fetcher(), &GitCli, source, &options).await;
    if let Some(pb) = &pb {
        pb.finish_and_clear();
    }
    let result = outcome.with_context(|| format!("failed to update {source}"))?;

    if format.is_json() {
        return print_json(&result);
    }
    if result.previous_version.as_deref() == Some(result.new_version.as_str()) {
        println!(
            "{}",
            Theme::info(&format!("{} is already at {}", result.source, result.new_version))
        );
    } else {
        println!(
            "{}",
            Theme::success(&format!(
                "Updated {} {} -> {}",
                result.source,
                result.previous_version.as_deref().unwrap_or("-"),
                result.new_version
            ))
        );
    }
    Ok(())
}
