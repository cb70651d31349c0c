// Copyright © 2026 The Goblet Authors
//
// This file is part of goblet, distributed under the terms of the GNU General
// Public License version 3 or later. For full terms see the included LICENSE
// file.

//! Request authorization seam.
//!
//! goblet does not ship an opinionated auth backend: callers wire in
//! whatever `RequestAuthorizer` fits their deployment (a reverse-proxy
//! header, a bearer-token check against an external service, mutual TLS
//! client identity, ...). The dispatcher only needs an identity string (for
//! `IsolationMode::User`) and a yes/no decision.

use async_trait::async_trait;
use http::HeaderMap;

use crate::error::Error;

#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    /// Opaque identity string, present when the request carried credentials
    /// the authorizer could resolve to an identity. Consumed by the
    /// isolation resolver under `IsolationMode::User`.
    pub identity: Option<String>,
    /// Raw value of the tenant claim header, if configured and present.
    /// Consumed by the isolation resolver under `IsolationMode::Tenant`.
    pub tenant_claim: Option<String>,
}

#[async_trait]
pub trait RequestAuthorizer: Send + Sync {
    async fn authorize(&self, headers: &HeaderMap) -> Result<AuthContext, Error>;
}

/// Accepts every request with no identity resolved. The default for
/// `IsolationMode::None`/`Sidecar` deployments and for tests.
pub struct AllowAll;

#[async_trait]
impl RequestAuthorizer for AllowAll {
    async fn authorize(&self, _headers: &HeaderMap) -> Result<AuthContext, Error> {
        Ok(AuthContext::default())
    }
}

/// Trusts two fixed request headers verbatim as identity/tenant claim. Fit
/// for deployments that sit behind a reverse proxy which has already
/// authenticated the caller and injected these headers; goblet does not
/// itself verify anything about them.
pub struct HeaderAuthorizer {
    pub user_header: Option<String>,
    pub tenant_header: Option<String>,
}

#[async_trait]
impl RequestAuthorizer for HeaderAuthorizer {
    async fn authorize(&self, headers: &HeaderMap) -> Result<AuthContext, Error> {
        let header_str = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        };
        Ok(AuthContext {
            identity: self.user_header.as_deref().and_then(header_str),
            tenant_claim: self.tenant_header.as_deref().and_then(header_str),
        })
    }
}
