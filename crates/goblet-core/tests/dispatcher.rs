// Copyright © 2026 The Goblet Authors
//
// This file is part of goblet, distributed under the terms of the GNU General
// Public License version 3 or later. For full terms see the included LICENSE
// file.

//! Exercises the router end-to-end with `tower::ServiceExt::oneshot`
//! against a temp-dir-backed store, upstream disabled. These cases never
//! touch the network or spawn a `git` subprocess: upstream-disabled is the
//! one refresh path that returns before calling either.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use bytes::Bytes;
use tower::ServiceExt;

use goblet_core::{
    config::{Config, UpstreamToggle},
    http::{auth::AllowAll, build_router, AppState},
    isolate::IsolationResolver,
    pktline::Frame,
    registry::Registry,
    store::Store,
    upstream::smart_http::HttpUpstream,
};

fn test_state(cache_root: std::path::PathBuf, upstream_enabled: bool) -> Arc<AppState> {
    let mut config = Config::default();
    config.cache_root = cache_root.clone();
    config.upstream_enabled = upstream_enabled;

    Arc::new(AppState {
        registry: Registry::new(),
        store: Store::new(cache_root),
        upstream: Arc::new(HttpUpstream::new(reqwest::Client::new(), config.upstream_base_url.clone())),
        upstream_toggle: Arc::new(UpstreamToggle::from(&config)),
        isolation: IsolationResolver::new(config.isolation.clone()).unwrap(),
        upstream_reachable: std::sync::atomic::AtomicBool::new(true),
        config,
    })
}

#[tokio::test]
async fn info_refs_on_uncached_repo_with_upstream_disabled_is_upstream_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path().to_path_buf(), false);
    let router = build_router(state, Arc::new(AllowAll), None);

    // `info/refs` with `Git-Protocol: version=2` hits the capability-
    // advertisement branch, which never touches the store, so it always
    // returns `OK` regardless of cache state. Drop the v2 header to reach
    // the path that actually resolves the repository.
    let request = Request::builder()
        .method("GET")
        .uri("/github.com/acme/widgets/info/refs?service=git-upload-pack")
        .body(Body::empty())
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn info_refs_serves_cached_empty_repo_without_contacting_upstream() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path().to_path_buf(), false);

    let repo_path = goblet_core::RepoKey::new(None, "github.com", "acme/widgets")
        .resolve(state.store.cache_root())
        .unwrap();
    state.store.ensure_initialized(&repo_path).unwrap();

    let router = build_router(state, Arc::new(AllowAll), None);
    let request = Request::builder()
        .method("GET")
        .uri("/github.com/acme/widgets/info/refs?service=git-upload-pack")
        .header("git-protocol", "version=2")
        .body(Body::empty())
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/x-git-upload-pack-advertisement"
    );

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(body.windows(b"version 2".len()).any(|w| w == b"version 2"));
}

#[tokio::test]
async fn ls_refs_on_cached_empty_repo_returns_a_flush_only_response() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path().to_path_buf(), false);

    let repo_path = goblet_core::RepoKey::new(None, "github.com", "acme/widgets")
        .resolve(state.store.cache_root())
        .unwrap();
    state.store.ensure_initialized(&repo_path).unwrap();

    let router = build_router(state, Arc::new(AllowAll), None);

    let mut body = Vec::new();
    body.extend_from_slice(&Frame::data(Bytes::from_static(b"command=ls-refs\n")).encode());
    body.extend_from_slice(&Frame::flush().encode());

    let request = Request::builder()
        .method("POST")
        .uri("/github.com/acme/widgets/git-upload-pack")
        .header("content-type", "application/x-git-upload-pack-request")
        .body(Body::from(body))
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"0000");
}

#[tokio::test]
async fn healthz_reports_ok_without_touching_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path().to_path_buf(), false);
    let router = build_router(state, Arc::new(AllowAll), None);

    let request = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn unrecognized_path_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path().to_path_buf(), false);
    let router = build_router(state, Arc::new(AllowAll), None);

    let request = Request::builder().uri("/not-a-git-endpoint").body(Body::empty()).unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
