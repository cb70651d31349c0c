// Copyright © 2026 The Goblet Authors
//
// This file is part of goblet, distributed under the terms of the GNU General
// Public License version 3 or later. For full terms see the included LICENSE
// file.

//! Command-line flags. These are the highest-priority layer of
//! configuration: anything set here overrides the config file and
//! environment variables.

use std::path::PathBuf;

use clap::Parser;
use goblet_core::config::IsolationMode;

#[derive(Debug, Parser)]
#[command(name = "goblet", author, version, about = "A Git caching reverse proxy", propagate_version = true)]
pub struct Args {
    /// Path to a TOML config file. Defaults to $GOBLET_CONFIG, if set.
    #[arg(long, env = "GOBLET_CONFIG")]
    pub config: Option<PathBuf>,

    /// Root directory under which bare repositories are cached.
    #[arg(long)]
    pub cache_root: Option<PathBuf>,

    /// Address to bind the HTTP server to, e.g. `0.0.0.0:8080`.
    #[arg(long)]
    pub bind: Option<String>,

    /// Base URL scheme used to reach upstream hosts (the host itself comes
    /// from the request path).
    #[arg(long)]
    pub upstream_url: Option<String>,

    /// Cache-path isolation mode.
    #[arg(long, value_enum)]
    pub isolation_mode: Option<IsolationModeArg>,

    /// How long a cached repository may go unrefreshed before a staleness
    /// warning is logged, e.g. `15m`, `1h`.
    #[arg(long)]
    pub stale_threshold: Option<String>,

    /// Start with upstream fetching disabled (serve only what is already
    /// cached).
    #[arg(long)]
    pub disable_upstream: bool,

    /// Deadline for an `ls-refs` round trip against upstream, e.g. `30s`.
    #[arg(long)]
    pub ls_refs_timeout: Option<String>,

    /// Deadline for a `fetch` round trip against upstream, e.g. `10m`.
    #[arg(long)]
    pub fetch_timeout: Option<String>,

    /// How long graceful shutdown waits for in-flight requests to drain.
    #[arg(long)]
    pub shutdown_grace: Option<String>,

    /// Replace sanitized isolation identifiers with a SHA-256 hash before
    /// they are used as a cache path component.
    #[arg(long)]
    pub hash_identifiers: bool,

    /// Emit structured JSON logs instead of human-readable text.
    #[arg(long, env = "GOBLET_LOG_JSON")]
    pub log_json: bool,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum IsolationModeArg {
    None,
    Sidecar,
    User,
    Tenant,
}

impl From<IsolationModeArg> for IsolationMode {
    fn from(arg: IsolationModeArg) -> Self {
        match arg {
            IsolationModeArg::None => IsolationMode::None,
            IsolationModeArg::Sidecar => IsolationMode::Sidecar,
            IsolationModeArg::User => IsolationMode::User,
            IsolationModeArg::Tenant => IsolationMode::Tenant,
        }
    }
}
