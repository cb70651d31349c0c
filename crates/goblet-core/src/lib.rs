// Copyright © 2026 The Goblet Authors
//
// This file is part of goblet, distributed under the terms of the GNU General
// Public License version 3 or later. For full terms see the included LICENSE
// file.

//! Core engine for `goblet`, a Git caching reverse proxy.
//!
//! This crate contains everything that is independent of how the process is
//! started: the pkt-line codec, the repository registry and its per-key
//! locking, the on-disk bare-repository store, the upstream Smart-HTTP v2
//! client, the cache-path isolation resolver, the failure/staleness policy,
//! and the axum-based protocol dispatcher that ties them together. The
//! binary crate (`goblet-cli`) only adds argument parsing, config loading
//! and process wiring on top.

pub mod config;
pub mod error;
pub mod http;
pub mod isolate;
pub mod oid;
pub mod pktline;
pub mod policy;
pub mod registry;
pub mod repokey;
pub mod store;
pub mod upstream;

pub use config::{Config, IsolationMode};
pub use error::{Error, Result};
pub use pktline::{Frame, FrameKind};
pub use repokey::RepoKey;
