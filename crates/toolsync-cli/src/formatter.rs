//! Command output formatting.

use serde::Serialize;

/// How command results are printed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) enum OutputFormat {
    /// Styled, human-readable text.
    #[default]
    Pretty,
    /// One JSON document on stdout.
    Json,
}

impl OutputFormat {
    /// Parse the `--format` flag. Unknown values fall back to pretty.
    pub(crate) fn parse(s: &str) -> Self {
        match s {
            "json" => Self::Json,
            _ => Self::Pretty,
        }
    }

    pub(crate) fn is_json(self) -> bool {
        self == Self::Json
    }
}

/// Print `value` as pretty JSON on stdout.
pub(crate) fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_format_is_pretty() {
        assert_eq!(OutputFormat::parse("json"), OutputFormat::Json);
        assert_eq!(OutputFormat::parse("yaml"), OutputFormat::Pretty);
        assert!(!OutputFormat::parse("pretty").is_json());
    }
}
