// Copyright © 2026 The Goblet Authors
//
// This file is part of goblet, distributed under the terms of the GNU General
// Public License version 3 or later. For full terms see the included LICENSE
// file.

//! Layered configuration loading: defaults, an optional TOML file,
//! `GOBLET_`-prefixed environment variables, then CLI flags, in that
//! priority order (CLI wins).

use std::path::Path;

use anyhow::Context;
use goblet_core::config::{Config, IsolationConfig};

use crate::args::Args;

pub fn load(args: &Args) -> anyhow::Result<Config> {
    let defaults = Config::default();

    let mut builder = config::Config::builder()
        .set_default("cache_root", defaults.cache_root.to_string_lossy().into_owned())?
        .set_default("bind", defaults.bind.clone())?
        .set_default("upstream_base_url", defaults.upstream_base_url.clone())?
        .set_default("stale_threshold", humantime::format_duration(defaults.stale_threshold).to_string())?
        .set_default(
            "staleness_warning_interval",
            humantime::format_duration(defaults.staleness_warning_interval).to_string(),
        )?
        .set_default("retry_after", humantime::format_duration(defaults.retry_after).to_string())?
        .set_default(
            "handle_idle_timeout",
            humantime::format_duration(defaults.handle_idle_timeout).to_string(),
        )?
        .set_default(
            "handle_sweep_interval",
            humantime::format_duration(defaults.handle_sweep_interval).to_string(),
        )?
        .set_default("upstream_enabled", defaults.upstream_enabled)?
        .set_default("ls_refs_timeout", humantime::format_duration(defaults.ls_refs_timeout).to_string())?
        .set_default("fetch_timeout", humantime::format_duration(defaults.fetch_timeout).to_string())?
        .set_default("shutdown_grace", humantime::format_duration(defaults.shutdown_grace).to_string())?
        .set_default("isolation.mode", "none")?
        .set_default("isolation.hash_identifiers", false)?;

    if let Some(path) = &args.config {
        builder = builder.add_source(config::File::from(path.clone()));
    } else {
        builder = builder.add_source(config::File::with_name("goblet").required(false));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("GOBLET")
            .prefix_separator("_")
            .separator("__"),
    );

    let mut cfg: Config = builder
        .build()
        .context("failed to assemble layered configuration")?
        .try_deserialize()
        .context("failed to deserialize configuration")?;

    apply_cli_overrides(&mut cfg, args);
    Ok(cfg)
}

fn apply_cli_overrides(cfg: &mut Config, args: &Args) {
    if let Some(cache_root) = &args.cache_root {
        cfg.cache_root = cache_root.clone();
    }
    if let Some(bind) = &args.bind {
        cfg.bind = bind.clone();
    }
    if let Some(upstream_url) = &args.upstream_url {
        cfg.upstream_base_url = upstream_url.clone();
    }
    if let Some(mode) = args.isolation_mode {
        cfg.isolation = IsolationConfig {
            mode: mode.into(),
            ..cfg.isolation.clone()
        };
    }
    if let Some(threshold) = &args.stale_threshold {
        if let Ok(parsed) = humantime::parse_duration(threshold) {
            cfg.stale_threshold = parsed;
        }
    }
    if args.disable_upstream {
        cfg.upstream_enabled = false;
    }
    if let Some(timeout) = &args.ls_refs_timeout {
        if let Ok(parsed) = humantime::parse_duration(timeout) {
            cfg.ls_refs_timeout = parsed;
        }
    }
    if let Some(timeout) = &args.fetch_timeout {
        if let Ok(parsed) = humantime::parse_duration(timeout) {
            cfg.fetch_timeout = parsed;
        }
    }
    if let Some(grace) = &args.shutdown_grace {
        if let Ok(parsed) = humantime::parse_duration(grace) {
            cfg.shutdown_grace = parsed;
        }
    }
    if args.hash_identifiers {
        cfg.isolation.hash_identifiers = true;
    }
}

pub fn config_file_hint(args: &Args) -> Option<&Path> {
    args.config.as_deref()
}
