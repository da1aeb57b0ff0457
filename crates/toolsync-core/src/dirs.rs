//! Where ai-tool-sync keeps its state.
//!
//! ```text
//! ~/.ai-tool-sync/                  ToolSyncHome
//! ├── plugins/                      plugin cache root + cache-manifest.json
//! ├── url-cache/                    disk tier of the URL fetch cache
//! ├── logs/                         rolling log files
//! └── config.toml                   user config
//!
//! <project>/.ai-tool-sync/          WorkspaceDir
//! └── config.toml                   committed project config
//! ```

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

/// Overrides the home location. Must be absolute.
pub const HOME_ENV_VAR: &str = "AI_TOOL_SYNC_HOME";

/// State directory name, used both under `$HOME` and in projects.
pub const DOT_DIR: &str = ".ai-tool-sync";

const CONFIG_FILE: &str = "config.toml";
const PLUGINS: &str = "plugins";
const URL_CACHE: &str = "url-cache";
const LOGS: &str = "logs";

/// Global state directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSyncHome {
    root: PathBuf,
}

impl ToolSyncHome {
    /// `$AI_TOOL_SYNC_HOME` when set, otherwise `~/.ai-tool-sync/`.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for a relative override, `NotFound` when no user home
    /// directory can be determined.
    pub fn resolve() -> io::Result<Self> {
        Self::resolve_with(
            std::env::var_os(HOME_ENV_VAR),
            directories::BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf()),
        )
    }

    fn resolve_with(overridden: Option<OsString>, user_home: Option<PathBuf>) -> io::Result<Self> {
        if let Some(raw) = overridden.filter(|raw| !raw.is_empty()) {
            let root = PathBuf::from(raw);
            if root.is_relative() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("{HOME_ENV_VAR} must be an absolute path, got {}", root.display()),
                ));
            }
            return Ok(Self { root });
        }

        user_home
            .map(|home| Self {
                root: home.join(DOT_DIR),
            })
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no home directory found; set {HOME_ENV_VAR}"),
                )
            })
    }

    /// Use `root` as the home directory as-is.
    #[must_use]
    pub fn from_path(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the cache and log directories.
    ///
    /// On Unix the root is set to `0o700`: plugins fetched with a token may
    /// come from private repositories.
    ///
    /// # Errors
    ///
    /// Propagates the first filesystem failure.
    pub fn ensure(&self) -> io::Result<()> {
        for dir in [self.plugins_dir(), self.url_cache_dir(), self.logs_dir()] {
            std::fs::create_dir_all(dir)?;
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.root, std::fs::Permissions::from_mode(0o700))?;
        }
        Ok(())
    }

    /// The home directory itself.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Plugin cache root.
    #[must_use]
    pub fn plugins_dir(&self) -> PathBuf {
        self.root.join(PLUGINS)
    }

    /// On-disk URL response cache.
    #[must_use]
    pub fn url_cache_dir(&self) -> PathBuf {
        self.root.join(URL_CACHE)
    }

    /// Rolling log files.
    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join(LOGS)
    }

    /// User-level `config.toml`.
    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }
}

/// A project that uses ai-tool-sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceDir {
    project_root: PathBuf,
}

impl WorkspaceDir {
    /// Find the project root for `start_dir`.
    ///
    /// The nearest ancestor (including `start_dir`) holding either a
    /// `.ai-tool-sync/` directory or a `.git` entry wins. With neither
    /// anywhere above, `start_dir` is the root.
    #[must_use]
    pub fn detect(start_dir: &Path) -> Self {
        let start = std::path::absolute(start_dir).unwrap_or_else(|_| start_dir.to_path_buf());
        let project_root = start
            .ancestors()
            .find(|dir| dir.join(DOT_DIR).is_dir() || dir.join(".git").exists())
            .map_or_else(|| start.clone(), Path::to_path_buf);
        Self { project_root }
    }

    /// Treat `project_root` as the project without probing.
    #[must_use]
    pub fn from_path(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
        }
    }

    /// Project root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.project_root
    }

    /// `<project>/.ai-tool-sync/`.
    #[must_use]
    pub fn dot_dir(&self) -> PathBuf {
        self.project_root.join(DOT_DIR)
    }

    /// Project-level `config.toml`.
    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.dot_dir().join(CONFIG_FILE)
    }
}
