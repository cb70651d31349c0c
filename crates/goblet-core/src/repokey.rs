// Copyright © 2026 The Goblet Authors
//
// This file is part of goblet, distributed under the terms of the GNU General
// Public License version 3 or later. For full terms see the included LICENSE
// file.

//! The canonical identifier for a cached repository, and its mapping onto a
//! filesystem path under `cache_root`.

use std::path::{Component, Path, PathBuf};

use crate::error::Error;

/// `(isolation_prefix, host, path)`. Two requests key to the same
/// [`RepoKey`] iff they target the same upstream repository under the same
/// tenant/user scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepoKey {
    pub isolation_prefix: Option<String>,
    pub host: String,
    pub path: String,
}

impl RepoKey {
    pub fn new(isolation_prefix: Option<String>, host: impl Into<String>, path: impl Into<String>) -> Self {
        let path = path.into();
        let path = path.strip_suffix(".git").unwrap_or(&path).to_string();
        Self {
            isolation_prefix,
            host: host.into(),
            path,
        }
    }

    /// Resolve the on-disk location of this key's repository, guaranteed to
    /// be a descendant of `cache_root` after normalization.
    ///
    /// Every path component is checked against traversal (`..`), absolute
    /// roots, and prefix components before being appended; this function is
    /// the single point that §3's "never traversed outside `cache_root`"
    /// invariant is enforced on the read side (the isolation resolver is
    /// responsible for sanitizing the inputs before a [`RepoKey`] is built,
    /// but we do not trust that alone).
    pub fn resolve(&self, cache_root: &Path) -> Result<PathBuf, Error> {
        let mut out = cache_root.to_path_buf();
        if let Some(prefix) = &self.isolation_prefix {
            push_safe(&mut out, prefix)?;
        }
        push_safe(&mut out, &self.host)?;
        for segment in self.path.split('/') {
            if !segment.is_empty() {
                push_safe(&mut out, segment)?;
            }
        }

        if !out.starts_with(cache_root) {
            return Err(Error::BadPath(format!(
                "resolved path {out:?} escapes cache root {cache_root:?}"
            )));
        }
        Ok(out)
    }
}

fn push_safe(out: &mut PathBuf, segment: &str) -> Result<(), Error> {
    if segment.is_empty() {
        return Err(Error::BadPath("empty path segment".into()));
    }
    let candidate = Path::new(segment);
    for component in candidate.components() {
        match component {
            Component::Normal(_) => {}
            other => {
                return Err(Error::BadPath(format!(
                    "path segment {segment:?} contains disallowed component {other:?}"
                )))
            }
        }
    }
    out.push(candidate);
    Ok(())
}

/// Extract `(host, repo_path)` from a request path of the form
/// `{host}/{repo-path}/git-upload-pack` or `{host}/{repo-path}/info/refs`,
/// rejecting traversal attempts. `host` is the first path segment (the
/// proxy is addressed per-upstream-host, e.g. `/github.com/acme/widgets/...`).
pub fn split_endpoint(raw_path: &str, suffix: &str) -> Result<(String, String), Error> {
    let trimmed = raw_path.trim_start_matches('/');
    let without_suffix = trimmed
        .strip_suffix(suffix)
        .ok_or_else(|| Error::BadPath(format!("path {raw_path:?} does not end in {suffix:?}")))?;
    let without_suffix = without_suffix.trim_end_matches('/');

    let mut parts = without_suffix.splitn(2, '/');
    let host = parts.next().filter(|s| !s.is_empty());
    let repo_path = parts.next().filter(|s| !s.is_empty());

    match (host, repo_path) {
        (Some(host), Some(repo_path)) => {
            if host.contains("..") || repo_path.split('/').any(|s| s == ".." || s.is_empty()) {
                return Err(Error::BadPath(format!("path traversal in {raw_path:?}")));
            }
            Ok((host.to_string(), repo_path.to_string()))
        }
        _ => Err(Error::BadPath(format!("empty repo path in {raw_path:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_under_cache_root() {
        let key = RepoKey::new(Some("user-alice".into()), "github.com", "acme/widgets");
        let root = Path::new("/var/cache/goblet");
        let resolved = key.resolve(root).unwrap();
        assert_eq!(
            resolved,
            Path::new("/var/cache/goblet/user-alice/github.com/acme/widgets")
        );
    }

    #[test]
    fn strips_dot_git_suffix() {
        let key = RepoKey::new(None, "github.com", "acme/widgets.git");
        assert_eq!(key.path, "acme/widgets");
    }

    #[test]
    fn rejects_traversal_in_segment() {
        let key = RepoKey::new(None, "github.com", "acme/../../etc");
        let root = Path::new("/var/cache/goblet");
        assert!(key.resolve(root).is_err());
    }

    #[test]
    fn split_endpoint_extracts_host_and_path() {
        let (host, path) =
            split_endpoint("/github.com/acme/widgets/git-upload-pack", "/git-upload-pack").unwrap();
        assert_eq!(host, "github.com");
        assert_eq!(path, "acme/widgets");
    }

    #[test]
    fn split_endpoint_rejects_traversal() {
        assert!(split_endpoint("/github.com/../etc/info/refs", "/info/refs").is_err());
    }

    #[test]
    fn split_endpoint_rejects_empty_repo_path() {
        assert!(split_endpoint("/github.com/git-upload-pack", "/git-upload-pack").is_err());
    }
}
