// Copyright © 2026 The Goblet Authors
//
// This file is part of goblet, distributed under the terms of the GNU General
// Public License version 3 or later. For full terms see the included LICENSE
// file.

//! The repository registry: a map from [`RepoKey`] to a [`RepoHandle`]
//! carrying a per-repository, FIFO-fair, async-aware reader/writer lock.
//!
//! Adapted from `link-git::refs::db::Refdb`'s map-of-locks shape, but with
//! `tokio::sync::RwLock` in place of `parking_lot::RwLock`: a writer here
//! holds the lock across an upstream network fetch, which means the
//! critical section spans `.await` points. `parking_lot`'s guards are not
//! `Send`-safe to hold across a suspend point and its lock has no notion of
//! cooperative yielding, so it is the wrong primitive once the writer's
//! critical section can block on I/O rather than just touching memory.
//! `tokio::sync::RwLock` is documented as write-preferring and services
//! waiters in the order they arrived, which is exactly the fairness this
//! registry needs between concurrent readers and an in-flight upstream
//! fetch.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant, SystemTime},
};

use tokio::sync::RwLock as AsyncRwLock;
use tracing::debug;

use crate::repokey::RepoKey;

/// Per-repository state gated behind the fair lock. Readers take a shared
/// guard to serve `upload-pack`/`ls-refs` out of the existing store;
/// writers take an exclusive guard to run an upstream fetch and update the
/// store in place.
///
/// `last_fetch_at` is wall-clock (`SystemTime`), not `Instant`: it is seeded
/// from the `.goblet-last-fetch` sidecar file on disk, which has no
/// meaningful mapping to `Instant`'s process-local monotonic clock.
pub struct RepoHandle {
    lock: AsyncRwLock<()>,
    last_fetch_at: Mutex<Option<SystemTime>>,
    last_staleness_warning_at: Mutex<Option<Instant>>,
    refcount: AtomicU64,
}

/// A read guard that reports itself to the `goblet_active_readers` gauge for
/// its lifetime.
pub struct ReadGuard<'a> {
    _inner: tokio::sync::RwLockReadGuard<'a, ()>,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        metrics::gauge!("goblet_active_readers").decrement(1.0);
    }
}

/// A write guard that reports itself to the `goblet_active_writers` gauge
/// for its lifetime.
pub struct WriteGuard<'a> {
    _inner: tokio::sync::RwLockWriteGuard<'a, ()>,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        metrics::gauge!("goblet_active_writers").decrement(1.0);
    }
}

impl RepoHandle {
    fn new() -> Self {
        Self {
            lock: AsyncRwLock::new(()),
            last_fetch_at: Mutex::new(None),
            last_staleness_warning_at: Mutex::new(None),
            refcount: AtomicU64::new(0),
        }
    }

    pub async fn read(&self) -> ReadGuard<'_> {
        let inner = self.lock.read().await;
        metrics::gauge!("goblet_active_readers").increment(1.0);
        ReadGuard { _inner: inner }
    }

    pub async fn write(&self) -> WriteGuard<'_> {
        let inner = self.lock.write().await;
        metrics::gauge!("goblet_active_writers").increment(1.0);
        WriteGuard { _inner: inner }
    }

    pub fn last_fetch_at(&self) -> Option<SystemTime> {
        *self.last_fetch_at.lock().expect("last_fetch_at mutex poisoned")
    }

    pub fn mark_fetched_now(&self) {
        *self.last_fetch_at.lock().expect("last_fetch_at mutex poisoned") = Some(SystemTime::now());
    }

    /// Seed `last_fetch_at` from a value recovered from the on-disk sidecar
    /// file, but only if nothing has set it yet in this process (a fetch
    /// that already happened this run always wins over a stale sidecar
    /// read).
    pub fn seed_last_fetch_if_absent(&self, at: SystemTime) {
        let mut guard = self.last_fetch_at.lock().expect("last_fetch_at mutex poisoned");
        if guard.is_none() {
            *guard = Some(at);
        }
    }

    /// Whether a staleness warning is due given `threshold`, and if so marks
    /// one as just-emitted. This is the registry's half of the rate-limited
    /// staleness warning: callers log, this just decides whether to.
    pub fn staleness_warning_due(&self, threshold: Duration) -> bool {
        let now = Instant::now();
        let mut last = self
            .last_staleness_warning_at
            .lock()
            .expect("staleness warning mutex poisoned");
        let due = last.map(|t| now.duration_since(t) >= threshold).unwrap_or(true);
        if due {
            *last = Some(now);
        }
        due
    }

    pub fn idle_for(&self) -> Option<Duration> {
        self.last_fetch_at()
            .and_then(|t| SystemTime::now().duration_since(t).ok())
    }
}

/// An RAII token that keeps a [`RepoHandle`] alive in the registry for as
/// long as any request references it; dropping the last one makes the
/// handle eligible for the idle eviction sweep.
pub struct HandleRef {
    key: RepoKey,
    handle: Arc<RepoHandle>,
}

impl HandleRef {
    pub fn key(&self) -> &RepoKey {
        &self.key
    }
}

impl std::ops::Deref for HandleRef {
    type Target = RepoHandle;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

impl Drop for HandleRef {
    fn drop(&mut self) {
        self.handle.refcount.fetch_sub(1, Ordering::AcqRel);
    }
}

/// The process-wide map of [`RepoKey`] to [`RepoHandle`]. Handles are
/// created lazily on first reference and never removed except by the idle
/// eviction sweep (§ supplemented feature: handle eviction, not data
/// eviction — the on-disk repository is untouched).
#[derive(Default)]
pub struct Registry {
    handles: Mutex<HashMap<RepoKey, Arc<RepoHandle>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the handle for `key`, bumping its refcount so it
    /// survives concurrent eviction sweeps until the returned [`HandleRef`]
    /// is dropped.
    pub fn acquire(&self, key: &RepoKey) -> HandleRef {
        let mut handles = self.handles.lock().expect("registry mutex poisoned");
        let handle = handles
            .entry(key.clone())
            .or_insert_with(|| Arc::new(RepoHandle::new()))
            .clone();
        handle.refcount.fetch_add(1, Ordering::AcqRel);
        HandleRef {
            key: key.clone(),
            handle,
        }
    }

    pub fn len(&self) -> usize {
        self.handles.lock().expect("registry mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Best-effort periodic sweep: drop handles that are both unreferenced
    /// (no in-flight request holds a [`HandleRef`]) and idle past
    /// `idle_timeout` since their last fetch. A handle that has never been
    /// fetched is never swept by idleness alone — only by refcount reaching
    /// zero combined with having existed past `idle_timeout` since creation
    /// is not tracked, so such handles are retained; in practice every
    /// handle acquires a fetch shortly after creation.
    pub fn sweep_idle(&self, idle_timeout: Duration) -> usize {
        let mut handles = self.handles.lock().expect("registry mutex poisoned");
        let before = handles.len();
        handles.retain(|key, handle| {
            let referenced = handle.refcount.load(Ordering::Acquire) > 0;
            let idle = handle.idle_for().map(|d| d >= idle_timeout).unwrap_or(false);
            let keep = referenced || !idle;
            if !keep {
                debug!(?key, "evicting idle repository handle");
            }
            keep
        });
        before - handles.len()
    }

    /// The staleness ages (time since last fetch) of the `top_n` most stale
    /// currently-loaded handles, for the detailed `/healthz` payload.
    /// Handles that have never been fetched are excluded: they have no age
    /// to report, only an absence.
    pub fn staleness_ages(&self, top_n: usize) -> Vec<Duration> {
        let handles = self.handles.lock().expect("registry mutex poisoned");
        let mut ages: Vec<Duration> = handles.values().filter_map(|h| h.idle_for()).collect();
        ages.sort_by(|a, b| b.cmp(a));
        ages.truncate(top_n);
        ages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(path: &str) -> RepoKey {
        RepoKey::new(None, "github.com", path)
    }

    #[test]
    fn acquire_is_idempotent_per_key() {
        let registry = Registry::new();
        let a = registry.acquire(&key("acme/widgets"));
        let b = registry.acquire(&key("acme/widgets"));
        assert!(Arc::ptr_eq(&a.handle, &b.handle));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn distinct_keys_get_distinct_handles() {
        let registry = Registry::new();
        let _a = registry.acquire(&key("acme/widgets"));
        let _b = registry.acquire(&key("acme/gizmos"));
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn readers_do_not_block_each_other() {
        let registry = Registry::new();
        let handle = registry.acquire(&key("acme/widgets"));
        let g1 = handle.read().await;
        let g2 = handle.read().await;
        drop(g1);
        drop(g2);
    }

    #[test]
    fn referenced_handle_survives_sweep() {
        let registry = Registry::new();
        let handle = registry.acquire(&key("acme/widgets"));
        handle.mark_fetched_now();
        let evicted = registry.sweep_idle(Duration::from_secs(0));
        assert_eq!(evicted, 0, "refcounted handle must not be evicted");
    }

    #[test]
    fn unreferenced_stale_handle_is_swept() {
        let registry = Registry::new();
        {
            let handle = registry.acquire(&key("acme/widgets"));
            handle.mark_fetched_now();
        }
        std::thread::sleep(Duration::from_millis(5));
        let evicted = registry.sweep_idle(Duration::from_millis(1));
        assert_eq!(evicted, 1);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn staleness_warning_is_rate_limited() {
        let handle = RepoHandle::new();
        assert!(handle.staleness_warning_due(Duration::from_secs(60)));
        assert!(!handle.staleness_warning_due(Duration::from_secs(60)));
    }
}
