use crate::error::{PluginError, PluginResult};

/// Validate a hostname used in a clone URL.
///
/// Only alphanumerics, hyphens and dots (plus an optional `:port`).
///
/// # Errors
///
/// Returns [`PluginError::InvalidSource`] if the host is empty or malformed.
pub fn validate_host(host: &str) -> PluginResult<()> {
    let (name, port) = match host.split_once(':') {
        Some((name, port)) => (name, Some(port)),
        None => (host, None),
    };
    if name.is_empty() || name.len() > 253 {
        return Err(PluginError::invalid_source(host, "host must be 1-253 characters"));
    }
    let is_valid = name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.'));
    if !is_valid {
        return Err(PluginError::invalid_source(
            host,
            "host may only contain alphanumerics, hyphens and dots",
        ));
    }
    if name.starts_with('-') || name.starts_with('.') || name.ends_with('.') || name.contains("..")
    {
        return Err(PluginError::invalid_source(host, "host has invalid format"));
    }
    if let Some(port) = port
        && port.parse::<u16>().is_err()
    {
        return Err(PluginError::invalid_source(host, "invalid port"));
    }
    Ok(())
}

/// Validate an owner or repository name.
///
/// # Errors
///
/// Returns [`PluginError::InvalidSource`] if the component is empty, longer
/// than 100 characters, or contains characters outside `[A-Za-z0-9-_.]`.
pub fn validate_component(value: &str, label: &str) -> PluginResult<()> {
    if value.is_empty() || value.len() > 100 {
        return Err(PluginError::invalid_source(
            value,
            format!("{label} must be 1-100 characters"),
        ));
    }
    let is_valid = value
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'));
    if !is_valid {
        return Err(PluginError::invalid_source(
            value,
            format!("{label} contains invalid characters"),
        ));
    }
    if value.starts_with('.') || value.starts_with('-') || value.contains("..") {
        return Err(PluginError::invalid_source(
            value,
            format!("{label} has invalid format"),
        ));
    }
    Ok(())
}

/// Validate a git ref (branch, tag or commit).
///
/// # Errors
///
/// Returns [`PluginError::InvalidSource`] if the ref violates git's naming
/// rules or could be mistaken for a command-line flag.
pub fn validate_git_ref(git_ref: &str) -> PluginResult<()> {
    if git_ref.is_empty() || git_ref.len() > 256 {
        return Err(PluginError::invalid_source(git_ref, "ref must be 1-256 characters"));
    }
    if git_ref.starts_with('-') {
        return Err(PluginError::invalid_source(git_ref, "ref must not start with '-'"));
    }
    if git_ref.contains("..") || git_ref.contains("//") || git_ref.contains("@{") {
        return Err(PluginError::invalid_source(git_ref, "ref contains a forbidden sequence"));
    }
    let is_valid = git_ref
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'/' | b'+'));
    if !is_valid {
        return Err(PluginError::invalid_source(git_ref, "ref contains invalid characters"));
    }
    if git_ref.starts_with('.')
        || git_ref.starts_with('/')
        || git_ref.ends_with('/')
        || git_ref.ends_with('.')
        || git_ref.ends_with(".lock")
    {
        return Err(PluginError::invalid_source(git_ref, "ref has invalid format"));
    }
    Ok(())
}

/// Validate a repository-relative subpath.
///
/// # Errors
///
/// Returns [`PluginError::InvalidSource`] for absolute paths, `.`/`..`
/// components, empty segments or control characters.
pub fn validate_subpath(subpath: &str) -> PluginResult<()> {
    if subpath.starts_with('/') || subpath.contains('\\') {
        return Err(PluginError::invalid_source(subpath, "subpath must be relative"));
    }
    for segment in subpath.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(PluginError::invalid_source(
                subpath,
                "subpath must not contain empty, '.' or '..' segments",
            ));
        }
        if segment.bytes().any(|b| b.is_ascii_control()) {
            return Err(PluginError::invalid_source(
                subpath,
                "subpath contains control characters",
            ));
        }
    }
    Ok(())
}
