//! Source-agnostic loading.

use std::sync::Arc;

use async_trait::async_trait;
use toolsync_core::content::LoadResult;
use tracing::debug;

use crate::error::{PluginError, PluginResult};
use crate::source::is_local_path;

/// Per-call loader knobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOptions {
    /// Ignore fresh cache entries.
    pub force_refresh: bool,
    /// Prefer SSH clone URLs.
    pub use_ssh: bool,
}

/// Turns a source specifier into parsed content.
#[async_trait]
pub trait Loader: Send + Sync {
    /// Short name for logs and diagnostics.
    fn name(&self) -> &'static str;

    /// Whether this loader handles `source`. Never performs I/O.
    fn can_load(&self, source: &str) -> bool;

    /// Load every content record `source` provides.
    async fn load(&self, source: &str, options: &LoadOptions) -> PluginResult<LoadResult>;
}

/// Dispatches a source to the first loader that accepts it.
#[derive(Clone, Default)]
pub struct PluginLoader {
    loaders: Vec<Arc<dyn Loader>>,
}

impl PluginLoader {
    /// Create an empty dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a loader. Earlier registrations win.
    #[must_use]
    pub fn with_loader(mut self, loader: Arc<dyn Loader>) -> Self {
        self.loaders.push(loader);
        self
    }

    /// The loader that handles `source`, if any.
    #[must_use]
    pub fn loader_for(&self, source: &str) -> Option<&Arc<dyn Loader>> {
        self.loaders.iter().find(|l| l.can_load(source))
    }

    /// Load `source` through the matching loader.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::InvalidSource`] if no loader accepts `source`,
    /// otherwise whatever the loader returns.
    pub async fn load(&self, source: &str, options: &LoadOptions) -> PluginResult<LoadResult> {
        let Some(loader) = self.loader_for(source) else {
            let reason = if is_local_path(source) {
                "local paths are loaded directly, not through the plugin cache"
            } else {
                "no loader accepts this source"
            };
            return Err(PluginError::invalid_source(source, reason));
        };
        debug!(source, loader = loader.name(), "Dispatching plugin load");
        loader.load(source, options).await
    }
}

impl std::fmt::Debug for PluginLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.loaders.iter().map(|l| l.name()).collect();
        f.debug_struct("PluginLoader").field("loaders", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Prefix(&'static str);

    #[async_trait]
    impl Loader for Prefix {
        fn name(&self) -> &'static str {
            self.0
        }

        fn can_load(&self, source: &str) -> bool {
            source.starts_with(self.0)
        }

        async fn load(&self, source: &str, _options: &LoadOptions) -> PluginResult<LoadResult> {
            let mut result = LoadResult::new(source);
            result.push_error(self.0, "marker");
            Ok(result)
        }
    }

    #[tokio::test]
    async fn dispatches_to_first_match() {
        let loader = PluginLoader::new()
            .with_loader(Arc::new(Prefix("github:")))
            .with_loader(Arc::new(Prefix("url:")));

        let result = loader.load("url:https://x", &LoadOptions::default()).await.unwrap();
        assert_eq!(result.errors[0].path, "url:");
        assert_eq!(loader.loader_for("github:a/b").unwrap().name(), "github:");
    }

    #[tokio::test]
    async fn unmatched_source_is_invalid() {
        let loader = PluginLoader::new().with_loader(Arc::new(Prefix("github:")));
        let err = loader.load("./local", &LoadOptions::default()).await.unwrap_err();
        match err {
            PluginError::InvalidSource { reason, .. } => assert!(reason.contains("local paths")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
