// Copyright © 2026 The Goblet Authors
//
// This file is part of goblet, distributed under the terms of the GNU General
// Public License version 3 or later. For full terms see the included LICENSE
// file.

//! `goblet`: process entry point. Parses CLI flags, assembles layered
//! configuration, wires the core engine together and serves HTTP until
//! asked to stop.

mod args;
mod config_file;
mod logging;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tracing::info;

use goblet_core::{
    config::UpstreamToggle,
    http::{
        auth::{AllowAll, HeaderAuthorizer, RequestAuthorizer},
        build_router, AppState,
    },
    isolate::IsolationResolver,
    registry::Registry,
    store::Store,
    upstream::HttpUpstream,
};

fn main() -> anyhow::Result<()> {
    let args = args::Args::parse();
    let config = config_file::load(&args)?;
    logging::init(args.log_json);

    if let Some(path) = config_file::config_file_hint(&args) {
        info!(path = %path.display(), "loaded configuration from file");
    }

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?
        .block_on(run(config))
}

async fn run(config: goblet_core::Config) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.cache_root)
        .with_context(|| format!("failed to create cache root {:?}", config.cache_root))?;

    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus metrics recorder")?;

    // The per-call `timeout` argument on `UpstreamTransport` methods honors
    // the distinct `ls_refs_timeout`/`fetch_timeout` deadlines; this
    // client-wide timeout is a defense-in-depth ceiling in case a call site
    // is ever added that forgets to pass one.
    let http_client = reqwest::Client::builder()
        .timeout(config.fetch_timeout)
        .build()
        .context("failed to build upstream HTTP client")?;
    let upstream = Arc::new(HttpUpstream::new(http_client, config.upstream_base_url.clone()));

    let isolation = IsolationResolver::new(config.isolation.clone()).context("invalid isolation configuration")?;
    let upstream_toggle = Arc::new(UpstreamToggle::from(&config));

    let authorizer: Arc<dyn RequestAuthorizer> = match config.isolation.mode {
        goblet_core::config::IsolationMode::None | goblet_core::config::IsolationMode::Sidecar => Arc::new(AllowAll),
        goblet_core::config::IsolationMode::User | goblet_core::config::IsolationMode::Tenant => {
            Arc::new(HeaderAuthorizer {
                user_header: config.isolation.user_header.clone(),
                tenant_header: config.isolation.tenant_header.clone(),
            })
        }
    };

    let state = Arc::new(AppState {
        registry: Registry::new(),
        store: Store::new(config.cache_root.clone()),
        upstream,
        upstream_toggle: upstream_toggle.clone(),
        isolation,
        upstream_reachable: std::sync::atomic::AtomicBool::new(true),
        config: config.clone(),
    });

    spawn_idle_sweep(state.clone());
    spawn_upstream_toggle_signal(upstream_toggle);

    let router = build_router(state, authorizer, Some(metrics_handle));

    let listener = TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    info!(addr = %config.bind, "goblet listening");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let grace = config.shutdown_grace;
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(());
        tokio::time::sleep(grace).await;
        tracing::error!(?grace, "graceful shutdown exceeded grace period, forcing exit");
        std::process::exit(1);
    });

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .await
        .context("server error")?;

    Ok(())
}

/// Periodically drop registry handles that have sat unreferenced and
/// unfetched past `handle_idle_timeout`. Purely in-process bookkeeping: no
/// on-disk data is ever touched by this sweep.
fn spawn_idle_sweep(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(state.config.handle_sweep_interval);
        loop {
            ticker.tick().await;
            let evicted = state.registry.sweep_idle(state.config.handle_idle_timeout);
            if evicted > 0 {
                tracing::debug!(evicted, "idle repository handle sweep");
            }
        }
    });
}

/// `SIGUSR1` flips the upstream-enabled toggle, letting an operator take
/// the process into cache-only mode (or back out of it) without a restart.
#[cfg(unix)]
fn spawn_upstream_toggle_signal(toggle: Arc<UpstreamToggle>) {
    tokio::spawn(async move {
        let Ok(mut stream) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::user_defined1()) else {
            return;
        };
        loop {
            stream.recv().await;
            let now_enabled = !toggle.is_enabled();
            toggle.set(now_enabled);
            info!(upstream_enabled = now_enabled, "toggled upstream fetching via SIGUSR1");
        }
    });
}

#[cfg(not(unix))]
fn spawn_upstream_toggle_signal(_toggle: Arc<UpstreamToggle>) {}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received, draining connections");
}
