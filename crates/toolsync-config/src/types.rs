use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Plugin and URL cache settings.
    pub cache: CacheConfig,
    /// Git fetch settings.
    pub git: GitConfig,
    /// HTTP fetch settings.
    pub http: HttpConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// `[cache]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Base directory for caches. `None` means the ai-tool-sync home.
    pub dir: Option<PathBuf>,
    /// How long a git checkout stays fresh.
    pub ttl_secs: u64,
    /// How long a fetched URL body stays fresh.
    pub url_ttl_secs: u64,
    /// Whether URL bodies are also cached on disk.
    pub url_disk_cache: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: None,
            ttl_secs: 86_400,
            url_ttl_secs: 3_600,
            url_disk_cache: true,
        }
    }
}

impl CacheConfig {
    /// Git checkout TTL.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// URL body TTL.
    #[must_use]
    pub fn url_ttl(&self) -> Duration {
        Duration::from_secs(self.url_ttl_secs)
    }
}

/// `[git]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    /// Upper bound for any single git subprocess.
    pub timeout_secs: u64,
    /// Shallow fetch depth.
    pub depth: u32,
    /// Prefer SSH clone URLs for shorthand sources.
    pub use_ssh: bool,
    /// Name of the environment variable holding an HTTPS token.
    pub token_env: Option<String>,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            depth: 1,
            use_ssh: false,
            token_env: Some("GITHUB_TOKEN".to_owned()),
        }
    }
}

impl GitConfig {
    /// Git subprocess timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// `[http]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Per-request timeout.
    pub timeout_secs: u64,
    /// `User-Agent` header value.
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: "ai-tool-sync".to_owned(),
        }
    }
}

impl HttpConfig {
    /// HTTP request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Base level filter.
    pub level: String,
    /// One of `pretty`, `compact`, `json`.
    pub format: String,
    /// Extra filter directives.
    pub directives: Vec<String>,
    /// Write to rolling files under `~/.ai-tool-sync/logs/` instead of stderr.
    pub file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "compact".to_owned(),
            directives: Vec::new(),
            file: false,
        }
    }
}
