//! `tracing` subscriber setup.
//!
//! Events go to stderr by default so that `--format json` command output on
//! stdout stays machine readable. Pointing the target at a directory switches
//! to daily rolling files named `ai-tool-sync.YYYY-MM-DD`.

use std::fmt;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::error::{TelemetryError, TelemetryResult};

/// Prefix for rolling log files.
const FILE_PREFIX: &str = "ai-tool-sync";

/// Rolled files kept on disk before the oldest is pruned.
const RETAINED_FILES: usize = 14;

/// HTTP and TLS crates that flood `debug` with connection chatter.
///
/// They stay at `warn` unless the base level is `trace` or a directive
/// names them explicitly.
const QUIET_DEPENDENCIES: &[&str] = &["hyper", "hyper_util", "h2", "reqwest", "rustls"];

/// How events are rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, indented fields.
    Pretty,
    /// One line per event.
    #[default]
    Compact,
    /// One JSON object per line.
    Json,
}

impl LogFormat {
    fn as_str(self) -> &'static str {
        match self {
            Self::Pretty => "pretty",
            Self::Compact => "compact",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogFormat {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Self::Pretty, Self::Compact, Self::Json]
            .into_iter()
            .find(|format| s.eq_ignore_ascii_case(format.as_str()))
            .ok_or_else(|| {
                TelemetryError::ConfigError(format!(
                    "unknown log format '{s}' (expected pretty, compact or json)"
                ))
            })
    }
}

/// Where events are written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    /// Standard error.
    #[default]
    Stderr,
    /// Daily rolling files inside this directory.
    Directory(PathBuf),
}

/// Subscriber settings, usually built from the `[logging]` config section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Base level filter such as `info` or `debug`.
    pub level: String,
    /// Event rendering.
    #[serde(default)]
    pub format: LogFormat,
    /// Output destination.
    #[serde(default)]
    pub target: LogTarget,
    /// Extra `EnvFilter` directives, applied after the base level.
    #[serde(default)]
    pub directives: Vec<String>,
    /// Prefix each event with a timestamp.
    #[serde(default = "enabled")]
    pub timestamps: bool,
}

fn enabled() -> bool {
    true
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::new("info")
    }
}

impl LogConfig {
    /// Compact stderr logging at `level`.
    #[must_use]
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            format: LogFormat::default(),
            target: LogTarget::default(),
            directives: Vec::new(),
            timestamps: true,
        }
    }

    /// Use `format` for rendering.
    #[must_use]
    pub fn with_format(self, format: LogFormat) -> Self {
        Self { format, ..self }
    }

    /// Write to `target` instead of stderr.
    #[must_use]
    pub fn with_target(self, target: LogTarget) -> Self {
        Self { target, ..self }
    }

    /// Append one filter directive (`toolsync_plugins::git=trace`).
    #[must_use]
    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    /// Drop timestamps from every event.
    #[must_use]
    pub fn without_timestamps(self) -> Self {
        Self {
            timestamps: false,
            ..self
        }
    }

    fn filter(&self) -> TelemetryResult<EnvFilter> {
        let mut filter = EnvFilter::try_new(&self.level).map_err(|e| invalid(&self.level, &e))?;

        if !self.level.eq_ignore_ascii_case("trace") {
            for name in QUIET_DEPENDENCIES {
                let named = self
                    .directives
                    .iter()
                    .any(|d| d.split('=').next() == Some(*name));
                if !named {
                    let directive = format!("{name}=warn");
                    filter = filter.add_directive(
                        directive.parse().map_err(|e| invalid(&directive, &e))?,
                    );
                }
            }
        }

        for directive in &self.directives {
            filter =
                filter.add_directive(directive.parse().map_err(|e| invalid(directive, &e))?);
        }
        Ok(filter)
    }
}

fn invalid(directive: &str, e: &dyn fmt::Display) -> TelemetryError {
    TelemetryError::ConfigError(format!("invalid log directive '{directive}': {e}"))
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

fn render<W>(config: &LogConfig, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(true);

    match config.format {
        LogFormat::Json if config.timestamps => layer.json().boxed(),
        LogFormat::Json => layer.json().without_time().boxed(),
        LogFormat::Pretty if config.timestamps => layer.pretty().boxed(),
        LogFormat::Pretty => layer.pretty().without_time().boxed(),
        LogFormat::Compact if config.timestamps => layer.compact().boxed(),
        LogFormat::Compact => layer.compact().without_time().boxed(),
    }
}

fn rolling_files(dir: &Path) -> TelemetryResult<RollingFileAppender> {
    std::fs::create_dir_all(dir)?;
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(FILE_PREFIX)
        .max_log_files(RETAINED_FILES)
        .build(dir)
        .map_err(|e| {
            TelemetryError::ConfigError(format!(
                "cannot write logs to {}: {e}",
                dir.display()
            ))
        })
}

/// Install the global subscriber described by `config`.
///
/// Colors are only used when stderr is a terminal.
///
/// # Errors
///
/// Fails on an unparsable level or directive, an unwritable log directory,
/// or when a global subscriber is already installed.
pub fn setup_logging(config: &LogConfig) -> TelemetryResult<()> {
    let filter = config.filter()?;
    let layer = match &config.target {
        LogTarget::Stderr => render(config, std::io::stderr, std::io::stderr().is_terminal()),
        LogTarget::Directory(dir) => render(config, rolling_files(dir)?, false),
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()
        .map_err(|e| TelemetryError::InitError(e.to_string()))
}

/// Install a subscriber for `RUST_LOG`, or `info` when it is unset.
///
/// # Errors
///
/// Fails when `RUST_LOG` does not parse or a subscriber is already installed.
pub fn setup_default_logging() -> TelemetryResult<()> {
    let level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_owned());
    setup_logging(&LogConfig::new(level))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(config: &LogConfig) -> String {
        config.filter().unwrap().to_string()
    }

    #[test]
    fn format_names_are_case_insensitive() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert_eq!(LogFormat::Compact.to_string(), "compact");
        assert!(matches!(
            "full".parse::<LogFormat>(),
            Err(TelemetryError::ConfigError(_))
        ));
    }

    #[test]
    fn http_crates_are_quieted_below_trace() {
        let debug = rendered(&LogConfig::new("debug"));
        assert!(debug.contains("hyper=warn"));
        assert!(debug.contains("reqwest=warn"));

        let trace = rendered(&LogConfig::new("trace"));
        assert!(!trace.contains("hyper=warn"));
    }

    #[test]
    fn explicit_directive_wins_over_quieting() {
        let filter = rendered(&LogConfig::new("info").with_directive("reqwest=debug"));
        assert!(filter.contains("reqwest=debug"));
        assert!(!filter.contains("reqwest=warn"));
    }

    #[test]
    fn bad_directive_is_a_config_error() {
        let config = LogConfig::new("info").with_directive("toolsync_plugins=loud");
        let err = config.filter().unwrap_err();
        assert!(err.to_string().contains("toolsync_plugins=loud"));
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: LogConfig =
            serde_json::from_str(r#"{"level":"warn","target":{"directory":"/tmp/logs"}}"#).unwrap();
        assert_eq!(config.format, LogFormat::Compact);
        assert_eq!(config.target, LogTarget::Directory(PathBuf::from("/tmp/logs")));
        assert!(config.timestamps);
        assert!(!config.without_timestamps().timestamps);
    }

    #[test]
    fn rolling_files_create_the_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("logs");
        rolling_files(&dir).unwrap();
        assert!(dir.is_dir());
    }
}
