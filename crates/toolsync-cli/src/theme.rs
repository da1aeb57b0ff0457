//! Terminal styling for command output.
//!
//! `colored` honors `NO_COLOR` and `CLICOLOR`, so nothing here checks the
//! terminal.

use colored::{ColoredString, Colorize};

pub(crate) struct Theme;

impl Theme {
    fn tagged(tag: ColoredString, text: impl std::fmt::Display) -> String {
        format!("{tag} {text}")
    }

    pub(crate) fn header(text: &str) -> String {
        text.bold().cyan().to_string()
    }

    pub(crate) fn success(text: &str) -> String {
        Self::tagged("✓".green(), text)
    }

    pub(crate) fn error(text: &str) -> String {
        Self::tagged("✗".red(), text.red())
    }

    pub(crate) fn warning(text: &str) -> String {
        Self::tagged("!".yellow(), text.yellow())
    }

    pub(crate) fn info(text: &str) -> String {
        Self::tagged("i".blue(), text)
    }

    pub(crate) fn dimmed(text: &str) -> String {
        text.dimmed().to_string()
    }

    /// Rule under table headers.
    pub(crate) fn separator() -> String {
        "━".repeat(60).dimmed().to_string()
    }

    /// Indented `key: value` line.
    pub(crate) fn kv(key: &str, value: &str) -> String {
        format!("  {}: {value}", key.bold())
    }

    /// Version tag, or a dimmed dash for untagged checkouts.
    pub(crate) fn version(version: Option<&str>) -> String {
        match version {
            Some(v) => v.cyan().to_string(),
            None => "-".dimmed().to_string(),
        }
    }

    pub(crate) fn timestamp(dt: &chrono::DateTime<chrono::Utc>) -> String {
        dt.format("%Y-%m-%d %H:%M").to_string().dimmed().to_string()
    }

    /// Binary-scaled size (`1.5 MiB`).
    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn bytes(n: u64) -> String {
        const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
        let mut value = n as f64;
        let mut unit = UNITS[0];
        for next in &UNITS[1..] {
            if value < 1024.0 {
                break;
            }
            value /= 1024.0;
            unit = next;
        }
        if unit == UNITS[0] {
            format!("{n} B")
        } else {
            format!("{value:.1} {unit}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_scale() {
        assert_eq!(Theme::bytes(0), "0 B");
        assert_eq!(Theme::bytes(1023), "1023 B");
        assert_eq!(Theme::bytes(1536), "1.5 KiB");
        assert_eq!(Theme::bytes(3_145_728), "3.0 MiB");
    }
}
