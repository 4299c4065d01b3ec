//! Result cache: TTL-bounded, single-flight per key.
//!
//! Every key gets its own async mutex, created on first use. The freshness
//! check and the fetch both happen while that mutex is held, so at most one
//! remote fetch per key is in flight at any time. Callers that queued behind
//! a fetch share its outcome, including its error.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::debug;

use palwatch_core::{HealthApi, RemoteError, RemoteResult, ServerSnapshot};

/// Default time a fetched bundle stays fresh.
pub const DEFAULT_TTL: Duration = Duration::from_secs(25);

/// A cached value and the moment it was fetched.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub fetched_at: Instant,
}

#[derive(Debug)]
struct SlotState<V> {
    entry: Option<CacheEntry<V>>,
    /// Failed fetch and the completion number it ended as.
    last_failure: Option<(u64, RemoteError)>,
}

#[derive(Debug)]
struct Slot<V> {
    state: Mutex<SlotState<V>>,
    /// Number of fetches that ran to completion on this key.
    completed: AtomicU64,
}

impl<V> Slot<V> {
    fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                entry: None,
                last_failure: None,
            }),
            completed: AtomicU64::new(0),
        }
    }
}

/// Per-key single-flight cache.
#[derive(Debug)]
pub struct ResultCache<V> {
    ttl: Duration,
    slots: RwLock<HashMap<String, Arc<Slot<V>>>>,
    fetches: AtomicU64,
}

/// The cache the workers share: one snapshot per API endpoint.
pub type SnapshotCache = ResultCache<Arc<ServerSnapshot>>;

impl<V: Clone> ResultCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: RwLock::new(HashMap::new()),
            fetches: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return the cached value for `key` if it is fresh, otherwise run
    /// `fetch` and cache its result.
    ///
    /// A failed fetch leaves the previous entry in place and is reported to
    /// the caller that ran it and to every caller that was waiting on it.
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, fetch: F) -> RemoteResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RemoteResult<V>>,
    {
        let slot = self.slot(key).await;
        let seen = slot.completed.load(Ordering::Acquire);
        let mut state = slot.state.lock().await;

        if let Some(entry) = &state.entry {
            if entry.fetched_at.elapsed() < self.ttl {
                return Ok(entry.value.clone());
            }
        }

        // A fetch finished while we were queued; if it failed, share it.
        let completed = slot.completed.load(Ordering::Acquire);
        if completed != seen {
            if let Some((n, err)) = &state.last_failure {
                if *n == completed {
                    return Err(err.clone());
                }
            }
        }

        debug!(%key, "cache miss, fetching");
        self.fetches.fetch_add(1, Ordering::Relaxed);
        let outcome = fetch().await;
        let n = slot.completed.fetch_add(1, Ordering::AcqRel) + 1;

        match outcome {
            Ok(value) => {
                state.entry = Some(CacheEntry {
                    value: value.clone(),
                    fetched_at: Instant::now(),
                });
                state.last_failure = None;
                Ok(value)
            }
            Err(e) => {
                debug!(%key, error = %e, "fetch failed, keeping previous entry");
                state.last_failure = Some((n, e.clone()));
                Err(e)
            }
        }
    }

    /// Cached entry for `key`, fresh or not, without fetching.
    pub async fn peek(&self, key: &str) -> Option<CacheEntry<V>> {
        let slot = self.slots.read().await.get(key).cloned()?;
        let state = slot.state.lock().await;
        state.entry.clone()
    }

    /// Drop the entry for `key` so the next caller fetches.
    pub async fn invalidate(&self, key: &str) {
        let slot = self.slots.read().await.get(key).cloned();
        if let Some(slot) = slot {
            slot.state.lock().await.entry = None;
            debug!(%key, "cache entry invalidated");
        }
    }

    /// Drop every entry. Per-key locks are kept.
    pub async fn clear(&self) {
        let slots: Vec<_> = self.slots.read().await.values().cloned().collect();
        for slot in slots {
            slot.state.lock().await.entry = None;
        }
    }

    /// Number of keys seen so far.
    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Total underlying fetches started since creation.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    async fn slot(&self, key: &str) -> Arc<Slot<V>> {
        if let Some(slot) = self.slots.read().await.get(key) {
            return Arc::clone(slot);
        }
        let mut slots = self.slots.write().await;
        Arc::clone(
            slots
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Slot::new())),
        )
    }
}

impl<V: Clone> Default for ResultCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

/// Fetch info, metrics and players concurrently as one bundle.
///
/// Fails if any of the three calls fails.
pub async fn fetch_snapshot(api: &dyn HealthApi) -> RemoteResult<Arc<ServerSnapshot>> {
    let (info, metrics, players) = tokio::try_join!(api.info(), api.metrics(), api.players())?;
    Ok(Arc::new(ServerSnapshot {
        info,
        metrics,
        players,
    }))
}
