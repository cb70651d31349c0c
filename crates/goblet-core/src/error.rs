// Copyright © 2026 The Goblet Authors
//
// This file is part of goblet, distributed under the terms of the GNU General
// Public License version 3 or later. For full terms see the included LICENSE
// file.

//! Crate-wide error kinds.
//!
//! Sub-components surface these structured errors; they never write to the
//! client directly. The dispatcher (`http::dispatch`) is the only place that
//! maps an [`Error`] to an HTTP status and response body.

use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// The error kinds enumerated in the error handling design.
#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed pkt-line framing: {0}")]
    BadFraming(#[from] crate::pktline::Error),

    #[error("bad repository path: {0}")]
    BadPath(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("repository not found upstream")]
    NotFound,

    #[error("upstream unavailable, cache cannot satisfy request (retry after {retry_after:?})")]
    UpstreamUnavailable { retry_after: Duration },

    #[error("requested object not present in cache")]
    MissingObject,

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn internal(e: impl std::fmt::Display) -> Self {
        Error::Internal(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Internal(format!("io error: {e}"))
    }
}

impl From<git2::Error> for Error {
    fn from(e: git2::Error) -> Self {
        Error::Internal(format!("git error: {e}"))
    }
}
