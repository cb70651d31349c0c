// Copyright © 2026 The Goblet Authors
//
// This file is part of goblet, distributed under the terms of the GNU General
// Public License version 3 or later. For full terms see the included LICENSE
// file.

//! The protocol dispatcher: wires registry locking, the local store, the
//! upstream client and the failure/staleness policy into the two Smart-HTTP
//! v2 request handlers.
//!
//! Both handlers follow the same shape: resolve a [`RepoKey`], acquire its
//! handle, decide whether an upstream refresh is due, attempt it under a
//! write lock if so, fall back to the existing local copy on a recoverable
//! failure per `policy::decide`, then serve the response from local state
//! under a read lock. There is no cross-request coordination beyond the
//! per-key lock: concurrent requests for different repositories never
//! contend, and concurrent requests for the same repository serialize only
//! for the duration of one upstream round trip.
//!
//! `ls-refs` and `fetch` refresh upstream differently. `ls-refs` is a cheap,
//! read-only ref listing: [`AppState::try_refresh_refs`] relays it straight
//! through to upstream when reachable and opportunistically mirrors the
//! refs it saw into the local store, but never bumps a handle's
//! `last_fetch_at` — only a real `fetch` transfers objects, and staleness is
//! tracked against object transfer, not ref visibility. `fetch` always
//! attempts the real upstream object transfer via
//! [`AppState::refresh_for_fetch`] when upstream is enabled.

use std::{
    sync::{atomic::AtomicBool, atomic::Ordering, Arc},
    time::{Instant, SystemTime},
};

use bytes::Bytes;
use tracing::{info, warn};

use crate::{
    config::Config,
    error::{Error, Result},
    http::{auth::AuthContext, fetch, ls_refs::LsRefsArgs},
    isolate::{IsolationResolver, RequestIdentity},
    pktline::{self, Command, Frame, FrameKind},
    policy::{self, Decision, FailureCategory, UpstreamFailure},
    registry::{HandleRef, Registry},
    repokey::RepoKey,
    store::Store,
    upstream::UpstreamTransport,
};

pub struct AppState {
    pub config: Config,
    pub registry: Registry,
    pub store: Store,
    pub upstream: Arc<dyn UpstreamTransport>,
    pub upstream_toggle: Arc<crate::config::UpstreamToggle>,
    pub isolation: IsolationResolver,
    /// Advisory-only: the outcome of the most recent upstream call, for the
    /// detailed `/healthz` payload. Never consulted by `policy::decide` —
    /// the failure/staleness policy remains stateless and re-evaluates
    /// reachability on every request independently.
    pub upstream_reachable: AtomicBool,
}

impl AppState {
    fn repo_key(&self, host: &str, repo_path: &str, auth: &AuthContext) -> Result<RepoKey> {
        let identity = RequestIdentity {
            user_header_value: auth.identity.as_deref(),
            tenant_header_value: auth.tenant_claim.as_deref(),
        };
        let prefix = self.isolation.resolve(&identity)?;
        Ok(RepoKey::new(prefix, host, repo_path))
    }

    /// Seed a freshly-acquired handle's `last_fetch_at` from the on-disk
    /// sidecar, but only if this process has not already recorded a fetch
    /// for it — a handle acquired for the first time after a restart has no
    /// in-memory notion of staleness otherwise.
    fn seed_handle_from_sidecar(&self, handle: &HandleRef, repo_path: &std::path::Path) {
        if let Ok(Some(at)) = self.store.read_last_fetch(repo_path) {
            handle.seed_last_fetch_if_absent(at);
        }
    }

    /// `ls-refs` refresh: relay `body` (a v2 `ls-refs` command request,
    /// either the client's own or a synthesized one for the legacy v0
    /// caller) straight to upstream and return its raw response for the
    /// caller to splice back to the client. As a side effect, successfully
    /// retrieved refs are mirrored into the local store — no objects are
    /// transferred, and `last_fetch_at` is untouched.
    ///
    /// Returns `Ok(None)` when the caller should fall back to rendering
    /// from the existing local copy instead: upstream is disabled, or a
    /// recoverable upstream failure permits serving stale local state.
    async fn try_refresh_refs(&self, key: &RepoKey, body: Bytes) -> Result<Option<Bytes>> {
        let repo_path = key.resolve(self.store.cache_root())?;
        let handle = self.registry.acquire(key);
        self.seed_handle_from_sidecar(&handle, &repo_path);

        if !self.upstream_toggle.is_enabled() {
            if self.store.is_initialized(&repo_path) {
                policy::maybe_warn_stale(
                    key,
                    &handle,
                    self.config.stale_threshold,
                    self.config.staleness_warning_interval,
                );
                return Ok(None);
            }
            return Err(Error::UpstreamUnavailable {
                retry_after: self.config.retry_after,
            });
        }

        let _write_guard = handle.write().await;
        self.store.ensure_initialized(&repo_path)?;

        let has_local_copy = || -> Result<bool> {
            Ok(self.store.is_initialized(&repo_path) && !self.store.read_refs(&repo_path)?.is_empty())
        };

        let repo_path_for_upstream = format!("{}/{}", key.host, key.path);
        match self
            .upstream
            .command(&repo_path_for_upstream, body, self.config.ls_refs_timeout)
            .await
        {
            Ok(response) => {
                self.upstream_reachable.store(true, Ordering::Relaxed);
                metrics::counter!("goblet_upstream_outcomes_total", "outcome" => "success").increment(1);
                if let Err(e) = self.store.mirror_refs_from_ls_refs_response(&repo_path, &response).await {
                    warn!(host = %key.host, path = %key.path, error = %e, "failed to mirror ls-refs response into local store");
                }
                Ok(Some(response))
            }
            Err(failure) => {
                self.upstream_reachable.store(false, Ordering::Relaxed);
                metrics::counter!("goblet_upstream_outcomes_total", "outcome" => failure_label(&failure)).increment(1);
                match policy::decide(&failure, has_local_copy()?) {
                    Decision::ServeStaleLocal => {
                        warn!(host = %key.host, path = %key.path, error = %failure.detail, "upstream unreachable, serving stale local ref listing");
                        policy::maybe_warn_stale(
                            key,
                            &handle,
                            self.config.stale_threshold,
                            self.config.staleness_warning_interval,
                        );
                        Ok(None)
                    }
                    Decision::PropagateFailure => Err(propagate(failure, self.config.retry_after)),
                }
            }
        }
    }

    /// `fetch` refresh: always attempt the real object transfer
    /// (`Store::upstream_fetch`) when upstream is enabled, probing
    /// reachability first the same way [`Self::try_refresh_refs`] does.
    /// Bumps `last_fetch_at` (in-memory and the on-disk sidecar) only on a
    /// successful transfer.
    async fn refresh_for_fetch(&self, key: &RepoKey) -> Result<()> {
        let repo_path = key.resolve(self.store.cache_root())?;
        let handle = self.registry.acquire(key);
        self.seed_handle_from_sidecar(&handle, &repo_path);

        if !self.upstream_toggle.is_enabled() {
            if self.store.is_initialized(&repo_path) {
                policy::maybe_warn_stale(
                    key,
                    &handle,
                    self.config.stale_threshold,
                    self.config.staleness_warning_interval,
                );
                return Ok(());
            }
            return Err(Error::UpstreamUnavailable {
                retry_after: self.config.retry_after,
            });
        }

        let _write_guard = handle.write().await;
        self.store.ensure_initialized(&repo_path)?;

        let has_local_copy = || -> Result<bool> {
            Ok(self.store.is_initialized(&repo_path) && !self.store.read_refs(&repo_path)?.is_empty())
        };

        let probe = self
            .upstream
            .info_refs(&format!("{}/{}", key.host, key.path), self.config.ls_refs_timeout)
            .await;
        let failure = match probe {
            Ok(_) => {
                self.upstream_reachable.store(true, Ordering::Relaxed);
                let started = Instant::now();
                let outcome = self
                    .store
                    .upstream_fetch(&repo_path, &self.upstream_base_url(key), self.config.fetch_timeout)
                    .await;
                metrics::histogram!("goblet_fetch_duration_seconds").record(started.elapsed().as_secs_f64());
                match outcome {
                    Ok(()) => {
                        handle.mark_fetched_now();
                        let now = SystemTime::now();
                        if let Err(e) = self.store.write_last_fetch(&repo_path, now) {
                            warn!(host = %key.host, path = %key.path, error = %e, "failed to persist last-fetch sidecar");
                        }
                        metrics::counter!("goblet_upstream_outcomes_total", "outcome" => "success").increment(1);
                        info!(host = %key.host, path = %key.path, "refreshed local cache from upstream");
                        return Ok(());
                    }
                    Err(e) => {
                        metrics::counter!("goblet_upstream_outcomes_total", "outcome" => "fetch_failed").increment(1);
                        UpstreamFailure {
                            category: crate::policy::FailureCategory::UpstreamHttp,
                            detail: e.to_string(),
                        }
                    }
                }
            }
            Err(failure) => {
                self.upstream_reachable.store(false, Ordering::Relaxed);
                metrics::counter!("goblet_upstream_outcomes_total", "outcome" => failure_label(&failure)).increment(1);
                failure
            }
        };

        match policy::decide(&failure, has_local_copy()?) {
            Decision::ServeStaleLocal => {
                warn!(host = %key.host, path = %key.path, error = %failure.detail, "upstream unreachable, serving stale local cache");
                policy::maybe_warn_stale(
                    key,
                    &handle,
                    self.config.stale_threshold,
                    self.config.staleness_warning_interval,
                );
                Ok(())
            }
            Decision::PropagateFailure => Err(propagate(failure, self.config.retry_after)),
        }
    }

    /// Reconstruct the upstream URL for `key`. The proxy addresses
    /// upstream repositories by embedding the host in the request path
    /// (`/github.com/acme/widgets/...`), so the scheme alone comes from
    /// configuration and the host/path come from the key.
    fn upstream_base_url(&self, key: &RepoKey) -> String {
        let scheme = self
            .config
            .upstream_base_url
            .split("://")
            .next()
            .unwrap_or("https");
        format!("{scheme}://{}/{}", key.host, key.path)
    }
}

/// A synthetic `ls-refs` v2 command request, used to refresh the legacy v0
/// `info/refs` advertisement against upstream: the v0 client never sends a
/// v2 command body itself, so the dispatcher builds the same request a v2
/// client would to get the same ref listing.
fn synthetic_ls_refs_request() -> Bytes {
    let frames = [
        Frame::data(Bytes::from_static(b"command=ls-refs\n")),
        Frame::delim(),
        Frame::data(Bytes::from_static(b"symrefs\n")),
        Frame::data(Bytes::from_static(b"peel\n")),
        Frame::flush(),
    ];
    concat_frames(&frames)
}

fn failure_label(failure: &UpstreamFailure) -> &'static str {
    match failure.category {
        FailureCategory::Network => "network",
        FailureCategory::UpstreamHttp => "upstream_http",
        FailureCategory::AuthRejected => "auth_rejected",
        FailureCategory::NotFound => "not_found",
        FailureCategory::Partial => "partial",
    }
}

/// Handle `GET .../info/refs[?service=git-upload-pack]`.
///
/// A `Git-Protocol: version=2` header selects the v2 capability
/// advertisement, which never includes ref state (real `git-upload-pack`
/// defers that to the `ls-refs` command), so it is answered immediately
/// with no store or upstream interaction. Its absence is the legacy v0
/// client, answered with the `# service=git-upload-pack` pkt-line preamble
/// followed by the v0 ref advertisement (the supplemented legacy-client
/// feature), refreshed against upstream first via a synthetic `ls-refs`.
pub async fn info_refs(state: &AppState, host: &str, repo_path: &str, auth: &AuthContext, is_v2: bool) -> Result<Bytes> {
    if is_v2 {
        return Ok(render_v2_capabilities());
    }

    let key = state.repo_key(host, repo_path, auth)?;
    state.try_refresh_refs(&key, synthetic_ls_refs_request()).await?;

    let resolved_path = key.resolve(state.store.cache_root())?;
    let handle = state.registry.acquire(&key);
    let _read_guard = handle.read().await;

    let refs = state.store.read_refs(&resolved_path)?;
    let head_symref = {
        let repo = git2::Repository::open_bare(&resolved_path)?;
        crate::store::refs::head_symref_target(&repo)?
    };
    Ok(render_v0_advertisement(&refs, head_symref.as_ref()))
}

/// Handle `POST .../git-upload-pack` for both the `ls-refs` and `fetch` v2
/// commands. `body` is the complete request payload; the leading
/// `command=<name>` frame decides which command this is.
pub async fn upload_pack(state: &AppState, host: &str, repo_path: &str, auth: &AuthContext, body: Bytes) -> Result<Bytes> {
    let key = state.repo_key(host, repo_path, auth)?;

    let mut cursor = std::io::Cursor::new(&body[..]);
    let first = pktline::read_frame(&mut cursor).await?;
    let command = Command::parse(&first.bytes).ok_or_else(|| Error::Internal("unrecognized v2 command".into()))?;

    match command {
        Command::LsRefs => {
            if let Some(spliced) = state.try_refresh_refs(&key, body.clone()).await? {
                return Ok(spliced);
            }

            let resolved_path = key.resolve(state.store.cache_root())?;
            let handle = state.registry.acquire(&key);
            let _read_guard = handle.read().await;

            let rest = pktline::scan_until(&mut cursor, FrameKind::Flush).await?;
            let lines: Vec<Bytes> = rest
                .into_iter()
                .filter(|f| f.kind == FrameKind::Data)
                .map(|f| f.bytes)
                .collect();
            let args = LsRefsArgs::parse(&lines);

            let refs = state.store.read_refs(&resolved_path)?;
            let head_symref = {
                let repo = git2::Repository::open_bare(&resolved_path)?;
                crate::store::refs::head_symref_target(&repo)?
            };
            let frames = ls_refs_render(&refs, head_symref.as_ref(), &args);
            Ok(concat_frames(&frames))
        }
        Command::Fetch => {
            metrics::counter!("goblet_fetch_requests_total", "final_round" => fetch::is_final_round(&body).to_string()).increment(1);

            state.refresh_for_fetch(&key).await?;

            let resolved_path = key.resolve(state.store.cache_root())?;
            let handle = state.registry.acquire(&key);
            let _read_guard = handle.read().await;

            let mut output = Vec::new();
            state
                .store
                .serve_upload_pack(
                    &resolved_path,
                    true,
                    std::io::Cursor::new(body.to_vec()),
                    &mut output,
                    state.config.fetch_timeout,
                )
                .await?;
            Ok(Bytes::from(output))
        }
    }
}

/// Map a failure that policy decided must propagate to the client-facing
/// error it should surface as. `AuthRejected`/`NotFound` are authoritative
/// upstream answers and must not be confused with transient
/// unavailability.
fn propagate(failure: UpstreamFailure, retry_after: std::time::Duration) -> Error {
    match failure.category {
        FailureCategory::AuthRejected => Error::Unauthorized(failure.detail),
        FailureCategory::NotFound => Error::NotFound,
        FailureCategory::Network | FailureCategory::UpstreamHttp | FailureCategory::Partial => {
            Error::UpstreamUnavailable { retry_after }
        }
    }
}

fn ls_refs_render(
    refs: &[crate::store::RefAdvertisement],
    head_symref: Option<&crate::store::SymrefTarget>,
    args: &LsRefsArgs,
) -> Vec<Frame> {
    crate::http::ls_refs::render(refs, head_symref, args)
}

fn concat_frames(frames: &[Frame]) -> Bytes {
    let mut out = Vec::new();
    for frame in frames {
        out.extend_from_slice(&frame.encode());
    }
    Bytes::from(out)
}

fn render_v2_capabilities() -> Bytes {
    let lines = [
        "version 2\n",
        "agent=goblet\n",
        "ls-refs=unborn\n",
        "fetch=shallow\n",
        "server-option\n",
        "object-format=sha1\n",
    ];
    let mut frames: Vec<Frame> = lines.iter().map(|l| Frame::data(Bytes::copy_from_slice(l.as_bytes()))).collect();
    frames.push(Frame::flush());
    concat_frames(&frames)
}

fn render_v0_advertisement(
    refs: &[crate::store::RefAdvertisement],
    head_symref: Option<&crate::store::SymrefTarget>,
) -> Bytes {
    let mut out = Vec::new();
    out.extend_from_slice(Frame::data(Bytes::from_static(b"# service=git-upload-pack\n")).encode().as_ref());
    out.extend_from_slice(&Frame::flush().encode());

    let capabilities = "multi_ack_detailed side-band-64k thin-pack ofs-delta agent=goblet";
    let mut first = true;
    for r in refs {
        let mut line = format!("{} {}", r.oid, r.name);
        if first {
            line.push('\0');
            line.push_str(capabilities);
            if let Some(target) = head_symref {
                line.push_str(&format!(" symref=HEAD:{}", target.target));
            }
            first = false;
        }
        line.push('\n');
        out.extend_from_slice(&Frame::data(Bytes::from(line.into_bytes())).encode());
    }
    if first {
        // no refs at all: advertise the zero-id capabilities line, matching
        // `git-upload-pack`'s behaviour against an empty repository.
        let line = format!("0000000000000000000000000000000000000000 capabilities^{{}}\0{}\n", capabilities);
        out.extend_from_slice(&Frame::data(Bytes::from(line.into_bytes())).encode());
    }
    out.extend_from_slice(&Frame::flush().encode());
    Bytes::from(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v2_capabilities_end_with_flush() {
        let bytes = render_v2_capabilities();
        assert!(bytes.ends_with(b"0000"));
        assert!(bytes.windows(b"version 2".len()).any(|w| w == b"version 2"));
    }

    #[test]
    fn v0_advertisement_on_empty_repo_uses_zero_id_capabilities_line() {
        let bytes = render_v0_advertisement(&[], None);
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("capabilities^{}"));
    }

    #[tokio::test]
    async fn synthetic_ls_refs_request_parses_as_ls_refs_command() {
        let body = synthetic_ls_refs_request();
        let mut cursor = std::io::Cursor::new(&body[..]);
        let first = pktline::read_frame(&mut cursor).await.unwrap();
        assert_eq!(Command::parse(&first.bytes), Some(Command::LsRefs));
    }
}
