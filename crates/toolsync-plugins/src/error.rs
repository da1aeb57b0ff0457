//! Plugin sourcing error types.

use std::path::PathBuf;
use std::time::Duration;

use crate::update::UpdateStage;

/// Errors from plugin sourcing, caching and update operations.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// The source specifier is malformed or uses an unknown scheme.
    #[error("invalid plugin source '{input}': {reason}")]
    InvalidSource {
        /// The offending specifier (or the component of it that failed).
        input: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Connection-level failure talking to a remote.
    #[error("network error fetching {url}: {message}")]
    Network {
        /// The URL being fetched.
        url: String,
        /// Failure description.
        message: String,
    },

    /// A bounded operation exceeded its deadline.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// What was running (e.g. `git fetch`, `GET https://...`).
        operation: String,
        /// The deadline that was exceeded.
        timeout: Duration,
    },

    /// A required resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The `git` binary is not on `PATH`.
    #[error("git is not installed or not on PATH")]
    GitUnavailable,

    /// Version checks and updates are not defined for filesystem sources.
    #[error("Local plugins cannot be updated: {0}")]
    LocalSourceUnsupported(String),

    /// The fetched repository lacks the requested subdirectory.
    #[error("subpath '{subpath}' does not exist in {}", root.display())]
    SubpathMissing {
        /// Repository-relative subpath that was requested.
        subpath: String,
        /// The fetched repository root.
        root: PathBuf,
    },

    /// The cache manifest is unreadable.
    #[error("cache integrity error at {}: {message}", path.display())]
    CacheIntegrity {
        /// Path of the manifest.
        path: PathBuf,
        /// Description of the corruption.
        message: String,
    },

    /// A remote answered with a non-success HTTP status.
    #[error("HTTP {status} fetching {url}")]
    Http {
        /// The URL being fetched.
        url: String,
        /// Response status code.
        status: u16,
    },

    /// A git subprocess exited non-zero.
    #[error("{command} failed: {stderr}")]
    GitCommandFailed {
        /// The git subcommand (e.g. `git fetch`).
        command: String,
        /// Captured stderr with credentials redacted.
        stderr: String,
    },

    /// The remote has no tags to compare against.
    #[error("no versions found for {0}")]
    NoVersionsFound(String),

    /// An update aborted; the previous installation was restored.
    #[error("update failed during {stage}: {reason}")]
    UpdateFailed {
        /// The step that failed.
        stage: UpdateStage,
        /// Failure description.
        reason: String,
    },

    /// A manifest or sidecar file could not be read or written.
    #[error("manifest error at {}: {message}", path.display())]
    Manifest {
        /// Path to the file.
        path: PathBuf,
        /// Error description.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PluginError {
    /// Whether a caller may reasonably retry the same operation.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout { .. } => true,
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    pub(crate) fn invalid_source(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSource {
            input: input.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for plugin operations.
pub type PluginResult<T> = Result<T, PluginError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_source_message() {
        let err = PluginError::LocalSourceUnsupported("./local/plugin".into());
        assert!(err.to_string().starts_with("Local plugins cannot be updated"));
    }

    #[test]
    fn sub_second_timeout_keeps_its_unit() {
        let err = PluginError::Timeout {
            operation: "GET https://example.com/rules/a.md".into(),
            timeout: Duration::from_millis(300),
        };
        assert_eq!(
            err.to_string(),
            "GET https://example.com/rules/a.md timed out after 300ms"
        );
    }

    #[test]
    fn retryable_classification() {
        assert!(
            PluginError::Timeout {
                operation: "git fetch".into(),
                timeout: Duration::from_secs(1)
            }
            .is_retryable()
        );
        assert!(
            PluginError::Http {
                url: "https://example.com".into(),
                status: 503
            }
            .is_retryable()
        );
        assert!(
            !PluginError::Http {
                url: "https://example.com".into(),
                status: 403
            }
            .is_retryable()
        );
        assert!(!PluginError::GitUnavailable.is_retryable());
    }
}
