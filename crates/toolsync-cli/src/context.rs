//! Builds plugin services from the resolved configuration.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use toolsync_config::Config;
use toolsync_core::content::{ContentParser, FrontmatterParser};
use toolsync_core::dirs::ToolSyncHome;
use toolsync_plugins::{
    GitFetchOptions, GitFetcher, GitLoader, GitToken, PluginCache, PluginLoader, UrlFetchOptions,
    UrlFetcher, UrlLoader, VersionCheckOptions,
};

/// Everything a command needs, built once per invocation.
pub(crate) struct CliContext {
    pub(crate) config: Config,
    pub(crate) home: ToolSyncHome,
    pub(crate) cache: Arc<PluginCache>,
}

impl CliContext {
    /// Resolve the home directory and open the plugin cache.
    ///
    /// `[cache] dir` relocates the whole home layout (plugins, URL cache).
    pub(crate) async fn open(config: Config) -> anyhow::Result<Self> {
        let home = match &config.cache.dir {
            Some(dir) => ToolSyncHome::from_path(dir.clone()),
            None => ToolSyncHome::resolve().context("could not resolve the ai-tool-sync home")?,
        };
        home.ensure()
            .with_context(|| format!("failed to create {}", home.root().display()))?;
        let cache = PluginCache::open(home.plugins_dir())
            .await
            .with_context(|| {
                format!("failed to open plugin cache at {}", home.plugins_dir().display())
            })?;
        Ok(Self { config, home, cache })
    }

    fn token(&self) -> Option<GitToken> {
        self.config
            .git
            .token_env
            .as_deref()
            .and_then(GitToken::from_env)
    }

    /// Git fetch options from `[git]` and `[cache]`.
    pub(crate) fn git_options(&self) -> GitFetchOptions {
        GitFetchOptions {
            cache_ttl: self.config.cache.ttl(),
            force_refresh: false,
            timeout: self.config.git.timeout(),
            token: self.token(),
            depth: self.config.git.depth,
            use_ssh: self.config.git.use_ssh,
        }
    }

    /// Tag lookup options from `[git]`.
    pub(crate) fn version_options(&self) -> VersionCheckOptions {
        VersionCheckOptions {
            timeout: self.config.git.timeout(),
            token: self.token(),
            use_ssh: self.config.git.use_ssh,
        }
    }

    fn url_disk_dir(&self) -> Option<PathBuf> {
        self.config
            .cache
            .url_disk_cache
            .then(|| self.home.url_cache_dir())
    }

    /// HTTP fetcher from `[http]` and `[cache]`.
    pub(crate) fn url_fetcher(&self) -> anyhow::Result<UrlFetcher> {
        let options = UrlFetchOptions {
            cache_ttl: self.config.cache.url_ttl(),
            timeout: self.config.http.timeout(),
            user_agent: self.config.http.user_agent.clone(),
            disk_cache_dir: self.url_disk_dir(),
        };
        UrlFetcher::new(options).context("failed to build HTTP client")
    }

    pub(crate) fn git_fetcher(&self) -> GitFetcher {
        GitFetcher::new(Arc::clone(&self.cache))
    }

    /// A loader that dispatches git and URL sources.
    pub(crate) fn plugin_loader(&self) -> anyhow::Result<PluginLoader> {
        let parser: Arc<dyn ContentParser> = Arc::new(FrontmatterParser);
        let git = GitLoader::new(
            Arc::new(self.git_fetcher()),
            self.git_options(),
            Arc::clone(&parser),
        );
        let url = UrlLoader::new(Arc::new(self.url_fetcher()?), parser);
        Ok(PluginLoader::new()
            .with_loader(Arc::new(git))
            .with_loader(Arc::new(url)))
    }
}
