// Copyright © 2026 The Goblet Authors
//
// This file is part of goblet, distributed under the terms of the GNU General
// Public License version 3 or later. For full terms see the included LICENSE
// file.

//! axum `Router` construction and the thin HTTP-layer translation between
//! `axum`/`http` types and the dispatcher's plain `Result<Bytes>` calls.
//!
//! Routing matches the shape `other_examples`' `oxidizing-git-cache`
//! dispatches on: a single catch-all route that inspects method and path
//! suffix, because the upstream host is itself a path segment
//! (`/{host}/{repo-path}/info/refs`) rather than something `axum`'s typed
//! path params can cleanly express alongside an arbitrary-depth repo path.

use std::{sync::Arc, time::Duration};

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::instrument;

use crate::{
    error::Error,
    http::{auth::RequestAuthorizer, dispatch, dispatch::AppState},
    repokey,
};

const X_REQUEST_ID: &str = "x-request-id";

pub fn build(state: Arc<AppState>, authorizer: Arc<dyn RequestAuthorizer>, metrics_handle: Option<PrometheusHandle>) -> Router {
    let request_id_header = http::HeaderName::from_static(X_REQUEST_ID);

    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_endpoint))
        .route("/*rest", any(dispatch_request))
        .layer(SetRequestIdLayer::new(request_id_header.clone(), MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::new(request_id_header))
        .with_state(RouterState {
            app: state,
            authorizer,
            metrics_handle,
        })
}

#[derive(Clone)]
struct RouterState {
    app: Arc<AppState>,
    authorizer: Arc<dyn RequestAuthorizer>,
    metrics_handle: Option<PrometheusHandle>,
}

const HEALTHZ_STALE_TOP_N: usize = 5;

async fn healthz(State(state): State<RouterState>, request: Request<Body>) -> Response {
    let detailed = request.uri().query().map(|q| q.contains("detailed=true")).unwrap_or(false);
    if !detailed {
        return StatusCode::OK.into_response();
    }
    let stale_ages_secs: Vec<u64> = state
        .app
        .registry
        .staleness_ages(HEALTHZ_STALE_TOP_N)
        .iter()
        .map(|d| d.as_secs())
        .collect();
    Json(json!({
        "status": "ok",
        "upstream_enabled": state.app.upstream_toggle.is_enabled(),
        "upstream_reachable": state.app.upstream_reachable.load(std::sync::atomic::Ordering::Relaxed),
        "cached_repositories": state.app.registry.len(),
        "stale_handle_ages_secs": stale_ages_secs,
    }))
    .into_response()
}

async fn metrics_endpoint(State(state): State<RouterState>) -> Response {
    match &state.metrics_handle {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[instrument(skip(state, request))]
async fn dispatch_request(State(state): State<RouterState>, request: Request<Body>) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let query = request.uri().query().unwrap_or("").to_string();
    let headers = request.headers().clone();
    let route_label = route_label(&path);

    let result = route(&state, &method, &path, &query, &headers, request).await;
    let response = match result {
        Ok(response) => response,
        Err(e) => error_response(e),
    };
    metrics::counter!(
        "goblet_http_requests_total",
        "route" => route_label,
        "method" => method.to_string(),
        "status" => response.status().as_u16().to_string(),
    )
    .increment(1);
    response
}

fn route_label(path: &str) -> &'static str {
    if path.ends_with("/info/refs") {
        "info_refs"
    } else if path.ends_with("/git-upload-pack") {
        "upload_pack"
    } else {
        "other"
    }
}

async fn route(
    state: &RouterState,
    method: &Method,
    path: &str,
    query: &str,
    headers: &HeaderMap,
    request: Request<Body>,
) -> Result<Response, Error> {
    let auth = state.authorizer.authorize(headers).await?;

    if method == Method::GET && path.ends_with("/info/refs") {
        let (host, repo_path) = repokey::split_endpoint(path, "/info/refs")?;
        let is_v2 = headers
            .get("git-protocol")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.contains("version=2"))
            .unwrap_or(false);
        let _ = query; // `service=git-upload-pack` is the only service this proxy serves
        let body = dispatch::info_refs(&state.app, &host, &repo_path, &auth, is_v2).await?;
        Ok(Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", "application/x-git-upload-pack-advertisement")
            .header("Cache-Control", "no-cache")
            .body(Body::from(body))
            .expect("static response builder"))
    } else if method == Method::POST && path.ends_with("/git-upload-pack") {
        let (host, repo_path) = repokey::split_endpoint(path, "/git-upload-pack")?;
        let body = axum::body::to_bytes(request.into_body(), usize::MAX)
            .await
            .map_err(|e| Error::internal(e))?;
        let result_body = dispatch::upload_pack(&state.app, &host, &repo_path, &auth, body).await?;
        Ok(Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", "application/x-git-upload-pack-result")
            .header("Cache-Control", "no-cache")
            .body(Body::from(result_body))
            .expect("static response builder"))
    } else {
        Ok(StatusCode::NOT_FOUND.into_response())
    }
}

fn error_response(e: Error) -> Response {
    let (status, retry_after): (StatusCode, Option<Duration>) = match &e {
        Error::BadFraming(_) | Error::BadPath(_) => (StatusCode::BAD_REQUEST, None),
        Error::Unauthorized(_) => (StatusCode::UNAUTHORIZED, None),
        Error::Forbidden(_) => (StatusCode::FORBIDDEN, None),
        Error::NotFound => (StatusCode::NOT_FOUND, None),
        Error::MissingObject => (StatusCode::SERVICE_UNAVAILABLE, None),
        Error::UpstreamUnavailable { retry_after } => (StatusCode::SERVICE_UNAVAILABLE, Some(*retry_after)),
        Error::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, None),
    };

    let mut response = (status, Json(json!({ "error": e.to_string() }))).into_response();
    if let Some(retry_after) = retry_after {
        if let Ok(value) = http::HeaderValue::from_str(&retry_after.as_secs().to_string()) {
            response.headers_mut().insert(http::header::RETRY_AFTER, value);
        }
    }
    response
}
