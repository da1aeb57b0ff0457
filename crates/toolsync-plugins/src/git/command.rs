//! Sandboxed `git` subprocess runner.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use base64::Engine as _;
use tokio::process::Command;
use tracing::debug;
use zeroize::Zeroizing;

use crate::error::{PluginError, PluginResult};

/// Replacement text for redacted credentials.
const REDACTED: &str = "***";

/// An access token for private remotes.
///
/// Never appears in argv, URLs, logs or error messages. The backing memory
/// is zeroed on drop.
#[derive(Clone)]
pub struct GitToken(Zeroizing<String>);

impl GitToken {
    /// Wrap a token. Returns `None` for an empty or whitespace-only value.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Option<Self> {
        let token = Zeroizing::new(token.into());
        if token.trim().is_empty() {
            None
        } else {
            Some(Self(token))
        }
    }

    /// Read a token from the environment variable `var`.
    #[must_use]
    pub fn from_env(var: &str) -> Option<Self> {
        std::env::var(var).ok().and_then(Self::new)
    }

    fn basic_credentials(&self) -> Zeroizing<String> {
        let raw = Zeroizing::new(format!("x-access-token:{}", self.0.as_str()));
        Zeroizing::new(base64::engine::general_purpose::STANDARD.encode(raw.as_bytes()))
    }

    /// `Authorization` header value passed to git as `http.extraHeader`.
    fn auth_header(&self) -> Zeroizing<String> {
        Zeroizing::new(format!("Authorization: Basic {}", self.basic_credentials().as_str()))
    }

    /// Replace every occurrence of the token (raw or encoded) in `text`.
    #[must_use]
    pub fn redact(&self, text: &str) -> String {
        text.replace(self.0.as_str(), REDACTED)
            .replace(self.basic_credentials().as_str(), REDACTED)
    }
}

impl std::fmt::Debug for GitToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("GitToken(***)")
    }
}

/// Whether a `git` binary is on `PATH`.
#[must_use]
pub fn git_available() -> bool {
    which::which("git").is_ok()
}

/// Run `git <args>` in `cwd` and return its stdout.
///
/// The child gets a scrubbed environment: only `PATH` and `HOME` are
/// inherited, system and global git config are ignored, and credential
/// prompts fail fast. Dropping the future kills the child.
///
/// # Errors
///
/// - [`PluginError::GitUnavailable`] if `git` cannot be spawned.
/// - [`PluginError::Timeout`] if the command outlives `timeout`.
/// - [`PluginError::GitCommandFailed`] on a non-zero exit, with stderr
///   redacted.
pub(crate) async fn run_git(
    args: &[&str],
    cwd: Option<&Path>,
    timeout: Duration,
    token: Option<&GitToken>,
) -> PluginResult<String> {
    let subcommand = args.first().copied().unwrap_or_default();
    let operation = format!("git {subcommand}");

    let mut cmd = Command::new("git");
    cmd.env_clear();
    if let Ok(path) = std::env::var("PATH") {
        cmd.env("PATH", path);
    }
    if let Ok(home) = std::env::var("HOME") {
        cmd.env("HOME", home);
    }
    cmd.env("GIT_CONFIG_NOSYSTEM", "1");
    cmd.env("GIT_CONFIG_GLOBAL", "/dev/null");
    cmd.env("GIT_TERMINAL_PROMPT", "0");
    cmd.env("GIT_SSH_COMMAND", "ssh -o BatchMode=yes");
    if let Some(token) = token {
        cmd.env("GIT_CONFIG_COUNT", "1");
        cmd.env("GIT_CONFIG_KEY_0", "http.extraHeader");
        cmd.env("GIT_CONFIG_VALUE_0", token.auth_header().as_str());
    }
    if let Some(cwd) = cwd {
        cmd.current_dir(cwd);
    }
    cmd.args(args);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);

    debug!(command = %operation, authenticated = token.is_some(), "Running git");

    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Err(_) => {
            return Err(PluginError::Timeout {
                operation,
                timeout,
            });
        },
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(PluginError::GitUnavailable);
        },
        Ok(Err(e)) => return Err(PluginError::Io(e)),
        Ok(Ok(output)) => output,
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = token.map_or_else(|| stderr.trim().to_owned(), |t| t.redact(stderr.trim()));
        return Err(PluginError::GitCommandFailed {
            command: operation,
            stderr,
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
