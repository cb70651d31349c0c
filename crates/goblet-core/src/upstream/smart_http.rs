// Copyright © 2026 The Goblet Authors
//
// This file is part of goblet, distributed under the terms of the GNU General
// Public License version 3 or later. For full terms see the included LICENSE
// file.

//! `reqwest`-backed implementation of [`super::UpstreamTransport`].

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use tracing::instrument;

use crate::policy::{FailureCategory, UpstreamFailure};

use super::UpstreamTransport;

/// `repo_path` passed to [`UpstreamTransport`] methods is expected to
/// already include the upstream host (`github.com/acme/widgets`), since
/// goblet addresses different upstream hosts through the request path
/// rather than through a fixed base URL. Only the scheme is fixed at
/// construction time.
pub struct HttpUpstream {
    client: Client,
    scheme: String,
}

impl HttpUpstream {
    pub fn new(client: Client, scheme: impl Into<String>) -> Self {
        let scheme = scheme.into();
        let scheme = scheme.split("://").next().unwrap_or("https").to_string();
        Self { client, scheme }
    }

    fn info_refs_url(&self, repo_path: &str) -> String {
        format!(
            "{}://{}/info/refs?service=git-upload-pack",
            self.scheme,
            repo_path.trim_matches('/')
        )
    }

    fn upload_pack_url(&self, repo_path: &str) -> String {
        format!("{}://{}/git-upload-pack", self.scheme, repo_path.trim_matches('/'))
    }
}

fn classify_status(status: StatusCode) -> FailureCategory {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FailureCategory::AuthRejected,
        StatusCode::NOT_FOUND | StatusCode::GONE => FailureCategory::NotFound,
        _ => FailureCategory::UpstreamHttp,
    }
}

fn classify_reqwest_error(e: &reqwest::Error) -> FailureCategory {
    if e.is_timeout() || e.is_connect() {
        FailureCategory::Network
    } else if e.is_body() || e.is_decode() {
        FailureCategory::Partial
    } else {
        FailureCategory::UpstreamHttp
    }
}

#[async_trait]
impl UpstreamTransport for HttpUpstream {
    #[instrument(skip(self))]
    async fn info_refs(&self, repo_path: &str, timeout: Duration) -> Result<Bytes, UpstreamFailure> {
        let response = self
            .client
            .get(self.info_refs_url(repo_path))
            .header("Git-Protocol", "version=2")
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| UpstreamFailure {
                category: classify_reqwest_error(&e),
                detail: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamFailure {
                category: classify_status(status),
                detail: format!("upstream responded {status}"),
            });
        }

        response.bytes().await.map_err(|e| UpstreamFailure {
            category: classify_reqwest_error(&e),
            detail: e.to_string(),
        })
    }

    #[instrument(skip(self, body))]
    async fn command(&self, repo_path: &str, body: Bytes, timeout: Duration) -> Result<Bytes, UpstreamFailure> {
        let response = self
            .client
            .post(self.upload_pack_url(repo_path))
            .header("Git-Protocol", "version=2")
            .header("Content-Type", "application/x-git-upload-pack-request")
            .timeout(timeout)
            .body(body)
            .send()
            .await
            .map_err(|e| UpstreamFailure {
                category: classify_reqwest_error(&e),
                detail: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamFailure {
                category: classify_status(status),
                detail: format!("upstream responded {status}"),
            });
        }

        response.bytes().await.map_err(|e| UpstreamFailure {
            category: classify_reqwest_error(&e),
            detail: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_join_scheme_and_host_qualified_repo_path() {
        let upstream = HttpUpstream::new(Client::new(), "https://");
        assert_eq!(
            upstream.info_refs_url("github.com/acme/widgets"),
            "https://github.com/acme/widgets/info/refs?service=git-upload-pack"
        );
        assert_eq!(
            upstream.upload_pack_url("/github.com/acme/widgets/"),
            "https://github.com/acme/widgets/git-upload-pack"
        );
    }

    #[test]
    fn classifies_auth_and_not_found_status_codes() {
        assert_eq!(classify_status(StatusCode::UNAUTHORIZED), FailureCategory::AuthRejected);
        assert_eq!(classify_status(StatusCode::FORBIDDEN), FailureCategory::AuthRejected);
        assert_eq!(classify_status(StatusCode::NOT_FOUND), FailureCategory::NotFound);
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), FailureCategory::UpstreamHttp);
    }
}
