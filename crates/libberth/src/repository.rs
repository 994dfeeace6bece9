use std::path::{Component, Path};

use crate::{
    error::{BerthError, Result},
    git,
    types::RepositoryId,
};

/// Identify the repository rooted at `repo_root`.
///
/// Uses the normalized `origin` URL so every clone of a project shares one
/// identity, falling back to the canonical root path.
pub fn identify(repo_root: &Path) -> Result<RepositoryId> {
    let url = git::remote_url(repo_root, "origin")
        .map_err(|e| BerthError::Context(format!("Failed to read origin remote: {e:#}")))?;
    if let Some(url) = url {
        let normalized = normalize_remote_url(&url);
        if !normalized.is_empty() {
            return Ok(RepositoryId::new(normalized));
        }
    }

    let canonical = repo_root.canonicalize().map_err(|e| {
        BerthError::Context(format!(
            "Failed to resolve repository path {}: {e}",
            repo_root.display()
        ))
    })?;
    Ok(RepositoryId::new(canonical.to_string_lossy()))
}

/// Normalize a remote URL into `host/path` form.
///
/// Strips the scheme, credentials, a trailing `.git` and slashes, rewrites
/// scp-style `host:path` and lowercases the host.
pub fn normalize_remote_url(url: &str) -> String {
    let url = url.trim();
    let (rest, had_scheme) = match url.split_once("://") {
        Some((_, rest)) => (rest, true),
        None => (url, false),
    };
    if rest.starts_with('/') || rest.starts_with('.') {
        // Local path remote.
        return trim_suffixes(rest).to_string();
    }

    let rest = match rest.split_once('@') {
        Some((user, host_and_path)) if !user.contains('/') => host_and_path,
        _ => rest,
    };

    let (host, path) = match rest.split_once('/') {
        Some((host, path)) if had_scheme || !host.contains(':') => (host, path),
        _ => match rest.split_once(':') {
            Some((host, path)) => (host, path),
            None => (rest, ""),
        },
    };
    // Drop an explicit port on scheme URLs; scp-style colons were handled above.
    let host = host.split(':').next().unwrap_or(host).to_lowercase();
    let path = trim_suffixes(path.trim_start_matches('/'));

    if path.is_empty() {
        host
    } else {
        format!("{host}/{path}")
    }
}

/// Remove trailing slashes and a `.git` suffix.
fn trim_suffixes(path: &str) -> &str {
    let path = path.trim_end_matches('/');
    path.strip_suffix(".git").unwrap_or(path)
}

/// Replace characters outside `[A-Za-z0-9_-]` with `-`.
pub fn clean_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Extract and clean the project name from a repository path.
pub fn project_name(repo_path: &Path) -> Result<String> {
    let name = repo_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_else(|| {
            repo_path
                .components()
                .next_back()
                .and_then(|c| match c {
                    Component::Normal(name) => name.to_str(),
                    _ => None,
                })
                .unwrap_or("root")
        });

    let cleaned = clean_name(name);

    if cleaned.is_empty() {
        return Err(BerthError::Context(
            "Could not derive a valid project name from repository path".to_string(),
        ));
    }

    Ok(cleaned)
}
