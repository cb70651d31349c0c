// Copyright © 2026 The Goblet Authors
//
// This file is part of goblet, distributed under the terms of the GNU General
// Public License version 3 or later. For full terms see the included LICENSE
// file.

//! Failure classification and the fall-back/staleness policy built on it.
//!
//! This module is deliberately stateless: it consumes an
//! [`UpstreamFailure`] plus whatever local state the caller already has
//! (does a cached copy exist? how old is it?) and returns a decision. There
//! is no circuit breaker and no cross-request failure memory — every
//! request re-evaluates upstream reachability independently, by design.

use std::time::Duration;

use tracing::warn;

use crate::{registry::RepoHandle, repokey::RepoKey};

/// How an attempt to reach upstream failed, as classified by the upstream
/// client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCategory {
    /// Connection could not be established, or timed out before any
    /// response was received.
    Network,
    /// Upstream responded, but with a server-side HTTP error (5xx) or a
    /// response that did not parse as a valid Smart-HTTP v2 payload.
    UpstreamHttp,
    /// Upstream responded with 401/403: the credentials goblet holds (or
    /// lack thereof) were rejected.
    AuthRejected,
    /// Upstream responded with 404: the repository does not exist, or this
    /// caller has no access to it.
    NotFound,
    /// Upstream's response stream ended before the protocol exchange
    /// completed (truncated pack, missing response-end marker).
    Partial,
}

impl FailureCategory {
    /// Whether this failure is eligible for local-fallback service. Only
    /// categories that plausibly mean "upstream is temporarily unreachable"
    /// fall back to a stale local copy; authoritative rejections
    /// (`AuthRejected`, `NotFound`) must propagate so the caller does not
    /// mistake cache staleness for access it does not have.
    pub fn allows_local_fallback(&self) -> bool {
        matches!(self, FailureCategory::Network | FailureCategory::UpstreamHttp | FailureCategory::Partial)
    }
}

#[derive(Debug, Clone)]
pub struct UpstreamFailure {
    pub category: FailureCategory,
    pub detail: String,
}

/// The outcome of applying policy to an upstream failure plus local state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Serve the existing local copy; staleness warning emission is the
    /// caller's responsibility via [`maybe_warn_stale`].
    ServeStaleLocal,
    /// No local copy exists to fall back to, or the failure category does
    /// not permit fallback: propagate the failure to the client.
    PropagateFailure,
}

/// Decide how to respond to an upstream failure.
///
/// `has_local_copy` must reflect a properly initialized local repository,
/// not merely the cache directory existing.
pub fn decide(failure: &UpstreamFailure, has_local_copy: bool) -> Decision {
    if has_local_copy && failure.category.allows_local_fallback() {
        Decision::ServeStaleLocal
    } else {
        Decision::PropagateFailure
    }
}

/// Emit a rate-limited staleness warning for `handle` if its last fetch is
/// older than `stale_threshold` and no warning has been logged for it
/// within `warning_interval`. No-op (and does not touch rate-limit state)
/// if the handle is within threshold.
pub fn maybe_warn_stale(
    key: &RepoKey,
    handle: &RepoHandle,
    stale_threshold: Duration,
    warning_interval: Duration,
) {
    let Some(idle) = handle.idle_for() else {
        return;
    };
    if idle < stale_threshold {
        return;
    }
    if handle.staleness_warning_due(warning_interval) {
        warn!(
            host = %key.host,
            path = %key.path,
            idle_secs = idle.as_secs(),
            "serving from stale local cache, upstream has not refreshed this repository recently"
        );
    }
}
