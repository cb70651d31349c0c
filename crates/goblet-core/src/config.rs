// Copyright © 2026 The Goblet Authors
//
// This file is part of goblet, distributed under the terms of the GNU General
// Public License version 3 or later. For full terms see the included LICENSE
// file.

//! Process configuration.
//!
//! `Config` is the pure-data result of layering defaults, an optional TOML
//! file, `GOBLET_`-prefixed environment variables and CLI flags (the
//! layering itself happens in `goblet-cli`, which owns the `config` crate
//! dependency and the file/env/flag precedence; this module only defines the
//! shape and the runtime-mutable bits).

use std::{
    path::PathBuf,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use serde::{Deserialize, Serialize};

/// How cache paths are scoped per caller. See the isolation resolver for the
/// sanitization and hashing rules each mode applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IsolationMode {
    /// No isolation: one shared cache namespace per upstream host/path.
    None,
    /// A single fixed prefix for this process, set once at startup.
    Sidecar,
    /// One prefix per authenticated user identity.
    User,
    /// One prefix per tenant, extracted from a configured claim or header
    /// via a regular expression capture group.
    Tenant,
}

impl Default for IsolationMode {
    fn default() -> Self {
        IsolationMode::None
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root directory under which bare repositories are stored.
    pub cache_root: PathBuf,

    /// Address the HTTP server binds to.
    pub bind: String,

    /// Scheme used to reach upstream hosts, e.g. `https://github.com` (only
    /// the `https` is actually used: the host comes from the request path,
    /// since one goblet instance can proxy multiple upstream hosts).
    pub upstream_base_url: String,

    pub isolation: IsolationConfig,

    /// How long a handle's last successful fetch may age before a
    /// staleness warning is logged on the next request it serves.
    #[serde(with = "humantime_serde")]
    pub stale_threshold: Duration,

    /// Minimum interval between repeated staleness warnings for the same
    /// handle.
    #[serde(with = "humantime_serde")]
    pub staleness_warning_interval: Duration,

    /// `Retry-After` value sent with 503s raised while upstream is
    /// unreachable and the cache cannot satisfy the request locally.
    #[serde(with = "humantime_serde")]
    pub retry_after: Duration,

    /// How long a repository handle may sit unreferenced and unfetched
    /// before the idle sweep drops it from the in-process registry. This
    /// evicts bookkeeping only; the on-disk repository is untouched.
    #[serde(with = "humantime_serde")]
    pub handle_idle_timeout: Duration,

    /// Interval between idle-handle sweeps.
    #[serde(with = "humantime_serde")]
    pub handle_sweep_interval: Duration,

    /// Start with upstream fetching disabled (cache-only/offline mode).
    /// Runtime-togglable via [`UpstreamToggle`]; this only seeds the
    /// initial value.
    pub upstream_enabled: bool,

    /// Deadline for an `ls-refs` round trip against upstream (the
    /// reachability probe and, when due, the ref-mirroring request).
    #[serde(with = "humantime_serde")]
    pub ls_refs_timeout: Duration,

    /// Deadline for a `fetch` round trip: the upstream reachability probe
    /// plus the `git fetch` subprocess it gates, and the local `git
    /// upload-pack` subprocess that serves the client afterwards.
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,

    /// How long graceful shutdown waits for in-flight requests to drain
    /// after a shutdown signal before forcing the process to exit.
    #[serde(with = "humantime_serde")]
    pub shutdown_grace: Duration,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolationConfig {
    pub mode: IsolationMode,
    /// Fixed prefix used by [`IsolationMode::Sidecar`].
    pub sidecar_prefix: Option<String>,
    /// Header carrying the authenticated user identity, for
    /// [`IsolationMode::User`].
    pub user_header: Option<String>,
    /// Header the tenant claim is read from, for [`IsolationMode::Tenant`].
    pub tenant_header: Option<String>,
    /// Regex applied to `tenant_header`'s value; its first capture group is
    /// the tenant id. Optional: when unset, the sanitized raw header/claim
    /// value is used directly as the tenant id.
    pub tenant_pattern: Option<String>,
    /// Replace the sanitized identifier with the first 16 hex characters of
    /// its SHA-256 hash before it is used as a cache path component. Off by
    /// default: most deployments isolate by an identifier that is already
    /// safe to persist (a username, a tenant slug), and only need hashing
    /// when that identifier might itself be sensitive (an email address).
    pub hash_identifiers: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_root: PathBuf::from("/var/cache/goblet"),
            bind: "127.0.0.1:8080".to_string(),
            upstream_base_url: "https://github.com".to_string(),
            isolation: IsolationConfig::default(),
            stale_threshold: Duration::from_secs(5 * 60),
            staleness_warning_interval: Duration::from_secs(5 * 60),
            retry_after: Duration::from_secs(30),
            handle_idle_timeout: Duration::from_secs(10 * 60),
            handle_sweep_interval: Duration::from_secs(60),
            upstream_enabled: true,
            ls_refs_timeout: Duration::from_secs(30),
            fetch_timeout: Duration::from_secs(600),
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

/// Process-wide, lock-free toggle for whether upstream fetches are
/// attempted at all. Exposed over an admin surface in `goblet-cli`; reads
/// happen on every request's fast path so this is an `AtomicBool`, not a
/// lock.
#[derive(Debug)]
pub struct UpstreamToggle(AtomicBool);

impl UpstreamToggle {
    pub fn new(enabled: bool) -> Self {
        Self(AtomicBool::new(enabled))
    }

    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, enabled: bool) {
        self.0.store(enabled, Ordering::Release);
    }
}

impl From<&Config> for UpstreamToggle {
    fn from(cfg: &Config) -> Self {
        Self::new(cfg.upstream_enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_upstream_enabled() {
        assert!(Config::default().upstream_enabled);
    }

    #[test]
    fn toggle_reflects_writes() {
        let toggle = UpstreamToggle::new(true);
        assert!(toggle.is_enabled());
        toggle.set(false);
        assert!(!toggle.is_enabled());
    }

    #[test]
    fn isolation_mode_round_trips_through_serde() {
        let json = serde_json::to_string(&IsolationMode::Tenant).unwrap();
        assert_eq!(json, "\"tenant\"");
        let back: IsolationMode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, IsolationMode::Tenant);
    }
}
