// Copyright © 2026 The Goblet Authors
//
// This file is part of goblet, distributed under the terms of the GNU General
// Public License version 3 or later. For full terms see the included LICENSE
// file.

//! Cache-path isolation: turns request identity into the `isolation_prefix`
//! component of a [`RepoKey`].
//!
//! Four modes are supported, matching `IsolationConfig::mode`:
//!
//! - `None`: no prefix at all, every caller shares one cache namespace.
//! - `Sidecar`: a single fixed prefix, set once at process startup.
//! - `User`: one prefix per authenticated identity, read from a header and
//!   sanitized/hashed before it ever touches the filesystem.
//! - `Tenant`: one prefix per tenant id, extracted from a header via a
//!   configured regex capture group.

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::{
    config::{IsolationConfig, IsolationMode},
    error::Error,
};

/// Everything the resolver needs out of an inbound request. Headers are
/// passed in already lower-cased-keyed by the caller (the HTTP layer owns
/// the actual `http::HeaderMap`).
pub struct RequestIdentity<'a> {
    pub user_header_value: Option<&'a str>,
    pub tenant_header_value: Option<&'a str>,
}

pub struct IsolationResolver {
    config: IsolationConfig,
    tenant_regex: Option<Regex>,
}

impl IsolationResolver {
    pub fn new(config: IsolationConfig) -> Result<Self, Error> {
        let tenant_regex = match &config.tenant_pattern {
            Some(pattern) => Some(Regex::new(pattern).map_err(|e| Error::Internal(format!("bad tenant_pattern: {e}")))?),
            None => None,
        };
        Ok(Self { config, tenant_regex })
    }

    /// Compute the isolation prefix for a request, or `None` for the shared
    /// namespace. Returned prefixes are already filesystem-safe
    /// (`sanitize`'d) and carry a mode-specific prefix (`user-`/`tenant-`),
    /// prepended unless the sanitized value already starts with it.
    pub fn resolve(&self, identity: &RequestIdentity<'_>) -> Result<Option<String>, Error> {
        match self.config.mode {
            IsolationMode::None => Ok(None),
            IsolationMode::Sidecar => Ok(self
                .config
                .sidecar_prefix
                .as_deref()
                .map(|p| with_prefix("sidecar-", &sanitize(p)))),
            IsolationMode::User => {
                let raw = identity
                    .user_header_value
                    .ok_or_else(|| Error::Unauthorized("missing user identity for isolation".into()))?;
                let identifier = if self.config.hash_identifiers {
                    hash_identity(raw)
                } else {
                    sanitize(raw)
                };
                Ok(Some(with_prefix("user-", &identifier)))
            }
            IsolationMode::Tenant => {
                let raw = identity
                    .tenant_header_value
                    .ok_or_else(|| Error::Forbidden("missing tenant claim for isolation".into()))?;
                let candidate = match &self.tenant_regex {
                    Some(regex) => regex
                        .captures(raw)
                        .and_then(|caps| caps.get(1))
                        .ok_or_else(|| Error::Forbidden(format!("tenant claim {raw:?} did not match pattern")))?
                        .as_str()
                        .to_string(),
                    None => raw.to_string(),
                };
                let identifier = if self.config.hash_identifiers {
                    hash_identity(&candidate)
                } else {
                    sanitize(&candidate)
                };
                Ok(Some(with_prefix("tenant-", &identifier)))
            }
        }
    }
}

fn with_prefix(prefix: &str, value: &str) -> String {
    if value.starts_with(prefix) {
        value.to_string()
    } else {
        format!("{prefix}{value}")
    }
}

/// Map `raw` to a filesystem-safe form, character by character: ASCII
/// alphanumerics, `-`, `_` and `.` pass through unchanged; `@` and every
/// other character map to `-`. No run-collapsing, so `a/../b` becomes
/// `a-..-b` rather than `a-b`. Idempotent: `sanitize(sanitize(x)) ==
/// sanitize(x)`, since every character this produces is itself a pass-
/// through character.
pub fn sanitize(raw: &str) -> String {
    let mapped: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let trimmed = mapped.trim_matches('-');
    let capped: String = trimmed.chars().take(64).collect();
    if capped.is_empty() {
        "x".to_string()
    } else {
        capped
    }
}

/// Hash an arbitrary identity string down to a short, filesystem-safe,
/// non-reversible token: the first 16 hex characters of its SHA-256.
/// Applied to [`IsolationMode::User`]/[`IsolationMode::Tenant`] identifiers
/// when `hash_identifiers` is set, so header values that might themselves
/// be sensitive (an email address) never appear verbatim in cache paths.
pub fn hash_identity(raw: &str) -> String {
    let digest = Sha256::digest(raw.as_bytes());
    hex::encode(digest)[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity<'a>(user: Option<&'a str>, tenant: Option<&'a str>) -> RequestIdentity<'a> {
        RequestIdentity {
            user_header_value: user,
            tenant_header_value: tenant,
        }
    }

    #[test]
    fn none_mode_never_prefixes() {
        let resolver = IsolationResolver::new(IsolationConfig::default()).unwrap();
        assert_eq!(resolver.resolve(&identity(None, None)).unwrap(), None);
    }

    #[test]
    fn sidecar_mode_uses_fixed_prefix() {
        let config = IsolationConfig {
            mode: IsolationMode::Sidecar,
            sidecar_prefix: Some("Build-42".into()),
            ..Default::default()
        };
        let resolver = IsolationResolver::new(config).unwrap();
        assert_eq!(
            resolver.resolve(&identity(None, None)).unwrap(),
            Some("sidecar-build-42".to_string())
        );
    }

    #[test]
    fn user_mode_requires_header() {
        let config = IsolationConfig {
            mode: IsolationMode::User,
            ..Default::default()
        };
        let resolver = IsolationResolver::new(config).unwrap();
        assert!(resolver.resolve(&identity(None, None)).is_err());

        let prefix = resolver
            .resolve(&identity(Some("alice@example.com"), None))
            .unwrap()
            .unwrap();
        assert_eq!(prefix, "user-alice-example.com");
    }

    #[test]
    fn user_mode_hashes_when_configured() {
        let config = IsolationConfig {
            mode: IsolationMode::User,
            hash_identifiers: true,
            ..Default::default()
        };
        let resolver = IsolationResolver::new(config).unwrap();

        let prefix = resolver
            .resolve(&identity(Some("alice@example.com"), None))
            .unwrap()
            .unwrap();
        assert!(prefix.starts_with("user-"));
        assert_eq!(prefix.len(), "user-".len() + 16);

        let again = resolver
            .resolve(&identity(Some("alice@example.com"), None))
            .unwrap()
            .unwrap();
        assert_eq!(prefix, again, "hashing must be deterministic");
    }

    #[test]
    fn tenant_mode_extracts_capture_group() {
        let config = IsolationConfig {
            mode: IsolationMode::Tenant,
            tenant_pattern: Some(r"^tenant:(\w+)$".into()),
            ..Default::default()
        };
        let resolver = IsolationResolver::new(config).unwrap();
        let prefix = resolver
            .resolve(&identity(None, Some("tenant:Acme-Corp")))
            .unwrap()
            .unwrap();
        assert_eq!(prefix, "tenant-Acme-Corp");
    }

    #[test]
    fn tenant_mode_rejects_non_matching_claim() {
        let config = IsolationConfig {
            mode: IsolationMode::Tenant,
            tenant_pattern: Some(r"^tenant:(\w+)$".into()),
            ..Default::default()
        };
        let resolver = IsolationResolver::new(config).unwrap();
        assert!(resolver.resolve(&identity(None, Some("nope"))).is_err());
    }

    #[test]
    fn tenant_mode_without_pattern_uses_sanitized_raw_value() {
        let config = IsolationConfig {
            mode: IsolationMode::Tenant,
            tenant_pattern: None,
            ..Default::default()
        };
        let resolver = IsolationResolver::new(config).unwrap();
        let prefix = resolver
            .resolve(&identity(None, Some("acme/../evil")))
            .unwrap()
            .unwrap();
        assert_eq!(prefix, "tenant-acme-..-evil");
    }

    #[test]
    fn sanitize_is_idempotent() {
        let once = sanitize("Weird!! Value///With Spaces");
        let twice = sanitize(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn sanitize_maps_at_and_other_characters_to_dash() {
        assert_eq!(sanitize("alice@example.com"), "alice-example.com");
        assert_eq!(sanitize("acme/../evil"), "acme-..-evil");
    }

    #[test]
    fn sanitize_never_produces_empty_string() {
        assert_eq!(sanitize("!!!"), "x");
    }
}
