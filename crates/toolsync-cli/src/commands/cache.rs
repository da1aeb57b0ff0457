//! Cache commands: info, clear and verify.

use anyhow::Context;
use dialoguer::Confirm;
use serde::Serialize;
use toolsync_plugins::ReconcileReport;

use crate::context::CliContext;
use crate::formatter::{OutputFormat, print_json};
use crate::theme::Theme;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CacheInfo {
    root: String,
    entries: usize,
    bytes: u64,
}

pub(crate) async fn cache_info(ctx: &CliContext, format: OutputFormat) -> anyhow::Result<()> {
    let info = CacheInfo {
        root: ctx.cache.cache_root().display().to_string(),
        entries: ctx.cache.list_cached().await.len(),
        bytes: ctx.cache.disk_usage().await,
    };
    if format.is_json() {
        return print_json(&info);
    }

    println!("{}", Theme::header("Plugin Cache"));
    println!("{}", Theme::kv("Location", &info.root));
    println!("{}", Theme::kv("Plugins", &info.entries.to_string()));
    println!("{}", Theme::kv("Size", &Theme::bytes(info.bytes)));
    Ok(())
}

pub(crate) async fn clear_cache(ctx: &CliContext, yes: bool, urls: bool) -> anyhow::Result<()> {
    if !yes {
        let confirm = Confirm::new()
            .with_prompt(format!(
                "Delete every cached plugin under {}?",
                ctx.cache.cache_root().display()
            ))
            .default(false)
            .interact()?;
        if !confirm {
            println!("{}", Theme::info("Aborted."));
            return Ok(());
        }
    }

    let removed = ctx.cache.clear_all().await.context("failed to clear plugin cache")?;
    println!("{}", Theme::success(&format!("Removed {removed} plugin director(ies)")));

    if urls {
        let fetcher = ctx.url_fetcher()?;
        fetcher.cache().clear().await.context("failed to clear URL cache")?;
        println!("{}", Theme::success("Cleared URL cache"));
    }
    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VerifyReport {
    #[serde(flatten)]
    manifest: ReconcileReport,
    pruned_url_responses: usize,
}

/// Drop URL responses older than `[cache] url_ttl_secs` from the disk tier.
async fn prune_url_responses(ctx: &CliContext) -> anyhow::Result<usize> {
    let fetcher = ctx.url_fetcher()?;
    fetcher
        .cache()
        .prune_expired()
        .await
        .context("failed to prune URL cache")
}

pub(crate) async fn verify_cache(ctx: &CliContext, format: OutputFormat) -> anyhow::Result<()> {
    let manifest = ctx.cache.reconcile().await.context("failed to verify plugin cache")?;
    let report = VerifyReport {
        manifest,
        pruned_url_responses: prune_url_responses(ctx).await?,
    };
    if format.is_json() {
        return print_json(&report);
    }

    let manifest = &report.manifest;
    if manifest.is_clean() {
        println!("{}", Theme::success("Cache manifest matches the filesystem"));
    }
    for id in &manifest.removed_entries {
        println!("{}", Theme::warning(&format!("Dropped entry '{id}': directory missing")));
    }
    for dir in &manifest.orphan_dirs {
        println!(
            "{}",
            Theme::warning(&format!("Untracked directory: {}", dir.display()))
        );
    }
    if !manifest.orphan_dirs.is_empty() {
        println!(
            "{}",
            Theme::dimmed("Untracked directories are left in place; `cache clear` removes them.")
        );
    }
    if report.pruned_url_responses > 0 {
        println!(
            "{}",
            Theme::info(&format!(
                "Pruned {} expired URL response(s)",
                report.pruned_url_responses
            ))
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use toolsync_config::Config;
    use toolsync_plugins::url::UrlCacheEntry;

    use super::*;

    #[tokio::test]
    async fn verify_prunes_expired_url_responses() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.cache.dir = Some(dir.path().to_path_buf());
        config.cache.url_disk_cache = true;
        config.cache.url_ttl_secs = 60;
        let ctx = CliContext::open(config).await.unwrap();

        let entry = |content: &str, age: chrono::Duration| UrlCacheEntry {
            content: content.to_owned(),
            fetched_at: Utc::now().checked_sub_signed(age).unwrap(),
            etag: None,
            last_modified: None,
        };
        let fetcher = ctx.url_fetcher().unwrap();
        fetcher
            .cache()
            .put("https://example.com/rules/old.md", entry("old", chrono::Duration::hours(2)))
            .await;
        fetcher
            .cache()
            .put("https://example.com/rules/new.md", entry("new", chrono::Duration::zero()))
            .await;

        assert_eq!(prune_url_responses(&ctx).await.unwrap(), 1);
        verify_cache(&ctx, OutputFormat::Json).await.unwrap();
        assert_eq!(prune_url_responses(&ctx).await.unwrap(), 0);
    }
}
