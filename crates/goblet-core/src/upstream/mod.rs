// Copyright © 2026 The Goblet Authors
//
// This file is part of goblet, distributed under the terms of the GNU General
// Public License version 3 or later. For full terms see the included LICENSE
// file.

//! The upstream Smart-HTTP v2 client.
//!
//! [`UpstreamTransport`] is the seam between the dispatcher/store and the
//! actual network call: production code runs against [`smart_http::HttpUpstream`]
//! (`reqwest`-backed), tests run against an in-memory fake that returns
//! canned responses or failures without a `wiremock` server. Every method
//! returns [`policy::UpstreamFailure`] on the error path so classification
//! happens once, at the boundary, rather than being re-derived by every
//! caller.

pub mod smart_http;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::policy::UpstreamFailure;

pub use smart_http::HttpUpstream;

/// A caller-opaque handle on an in-flight Smart-HTTP v2 exchange against one
/// repository. `ls_refs` and `fetch` are independent request/response pairs
/// in v2 (unlike v1's single persistent connection), so the transport needs
/// no state between them beyond the base URL and repo path already baked
/// into the implementor.
#[async_trait]
pub trait UpstreamTransport: Send + Sync {
    /// Perform the initial `GET .../info/refs?service=git-upload-pack`
    /// capability/ref advertisement request with `Git-Protocol: version=2`.
    /// Returns the raw pkt-line response body.
    async fn info_refs(&self, repo_path: &str, timeout: Duration) -> Result<Bytes, UpstreamFailure>;

    /// POST a v2 command request body (as framed by the caller) to
    /// `.../git-upload-pack` and return the raw pkt-line response body.
    async fn command(&self, repo_path: &str, body: Bytes, timeout: Duration) -> Result<Bytes, UpstreamFailure>;
}

#[cfg(test)]
pub mod fake {
    use super::*;
    use std::sync::Mutex;

    /// An in-memory [`UpstreamTransport`] for tests: each call pops the
    /// next scripted response off its queue.
    #[derive(Default)]
    pub struct FakeUpstream {
        info_refs: Mutex<Vec<Result<Bytes, UpstreamFailure>>>,
        commands: Mutex<Vec<Result<Bytes, UpstreamFailure>>>,
    }

    impl FakeUpstream {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push_info_refs(&self, result: Result<Bytes, UpstreamFailure>) {
            self.info_refs.lock().unwrap().push(result);
        }

        pub fn push_command(&self, result: Result<Bytes, UpstreamFailure>) {
            self.commands.lock().unwrap().push(result);
        }
    }

    #[async_trait]
    impl UpstreamTransport for FakeUpstream {
        async fn info_refs(&self, _repo_path: &str, _timeout: Duration) -> Result<Bytes, UpstreamFailure> {
            self.info_refs
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| panic!("FakeUpstream: no scripted info_refs response left"))
        }

        async fn command(&self, _repo_path: &str, _body: Bytes, _timeout: Duration) -> Result<Bytes, UpstreamFailure> {
            self.commands
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| panic!("FakeUpstream: no scripted command response left"))
        }
    }
}
