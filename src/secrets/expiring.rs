//! Bounded TTL cache with de-duplicated fetches.
//!
//! Entries live in a `moka` cache bounded by capacity only. Expiry is tracked
//! per entry rather than by moka, because an expired entry must stay readable
//! until a refresh replaces it: a failed fetch never evicts the last good value.
//!
//! Concurrent fetches for one key share a single call of the fetch function
//! through an [`InFlight`] registry. The fetch function receives the current
//! (possibly stale) value so it can derive the replacement from it.

use futures::future::{BoxFuture, FutureExt};
use moka::future::Cache;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::observability::metrics::{self, Lookup};
use crate::utils::inflight::{InFlight, Pending};

/// Produces the replacement for `key` from its current value, if any.
pub type FetchFn<K, V, E> =
    Arc<dyn Fn(K, Option<Arc<V>>) -> BoxFuture<'static, Result<V, E>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiringOptions {
    pub max_capacity: u64,
    pub default_ttl: Duration,
    /// Serve an expired value at once and refresh it in the background.
    pub allow_stale: bool,
}

impl Default for ExpiringOptions {
    fn default() -> Self {
        Self { max_capacity: 1000, default_ttl: Duration::from_secs(300), allow_stale: false }
    }
}

struct Slot<V> {
    value: Arc<V>,
    expires_at: Instant,
    ttl: Duration,
}

impl<V> Clone for Slot<V> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            expires_at: self.expires_at,
            ttl: self.ttl,
        }
    }
}

impl<V> Slot<V> {
    fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

struct Shared<K, V, E> {
    entries: Cache<K, Slot<V>>,
    fetch: FetchFn<K, V, E>,
    options: ExpiringOptions,
}

impl<K, V, E> Shared<K, V, E>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn slot(&self, value: Arc<V>, ttl: Duration, expires_at: Instant) -> Slot<V> {
        Slot { value, expires_at, ttl }
    }
}

/// Generic expiring cache. Cheap to clone; clones share entries.
pub struct ExpiringCache<K, V, E>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    shared: Arc<Shared<K, V, E>>,
    inflight: Arc<InFlight<K, Result<Arc<V>, E>>>,
}

impl<K, V, E> Clone for ExpiringCache<K, V, E>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared), inflight: Arc::clone(&self.inflight) }
    }
}

impl<K, V, E> ExpiringCache<K, V, E>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
    E: Clone + fmt::Display + Send + Sync + 'static,
{
    pub fn new(fetch: FetchFn<K, V, E>, options: ExpiringOptions) -> Self {
        let entries = Cache::builder().max_capacity(options.max_capacity).build();
        Self {
            shared: Arc::new(Shared { entries, fetch, options }),
            inflight: Arc::new(InFlight::new()),
        }
    }

    pub fn options(&self) -> &ExpiringOptions {
        &self.shared.options
    }

    /// Store `value` as fresh for `ttl` (the default when `None`).
    pub async fn set(&self, key: K, value: V, ttl: Option<Duration>) -> Arc<V> {
        let ttl = ttl.unwrap_or(self.shared.options.default_ttl);
        self.store(key, value, ttl, Instant::now() + ttl).await
    }

    /// Store `value` as already expired and start fetching its replacement
    /// on a spawned task. The fetch is registered before this returns, so
    /// later reads join it.
    pub async fn set_refreshing(&self, key: K, value: V, ttl: Option<Duration>) -> Arc<V> {
        let ttl = ttl.unwrap_or(self.shared.options.default_ttl);
        self.inflight.forget(&key);
        let value = Arc::new(value);
        let slot = self.shared.slot(Arc::clone(&value), ttl, Instant::now());
        self.shared.entries.insert(key.clone(), slot.clone()).await;
        self.spawn_refresh(key, Some(slot));
        value
    }

    async fn store(&self, key: K, value: V, ttl: Duration, expires_at: Instant) -> Arc<V> {
        // A fetch started for the replaced entry must not land on top of it.
        self.inflight.forget(&key);
        let value = Arc::new(value);
        let slot = self.shared.slot(Arc::clone(&value), ttl, expires_at);
        self.shared.entries.insert(key, slot).await;
        value
    }

    /// Current value regardless of expiry, without fetching.
    pub async fn peek(&self, key: &K) -> Option<Arc<V>> {
        self.shared.entries.get(key).await.map(|slot| slot.value)
    }

    /// Fetch the value for `key`.
    ///
    /// Joins a fetch already in flight. Otherwise returns a fresh entry as is
    /// unless `force` is set; a stale entry is returned immediately with a
    /// background refresh when stale serving is enabled. On error the cached
    /// entry is left in place.
    pub async fn fetch(&self, key: K, force: bool) -> Result<Arc<V>, E> {
        if let Some(pending) = self.inflight.pending(&key) {
            debug!(key = ?key, "joining in-flight fetch");
            return pending.await;
        }

        let current = self.shared.entries.get(&key).await;
        if !force {
            if let Some(slot) = &current {
                if slot.is_fresh(Instant::now()) {
                    metrics::record_cache_lookup(Lookup::Hit);
                    return Ok(Arc::clone(&slot.value));
                }
                if self.shared.options.allow_stale {
                    metrics::record_cache_lookup(Lookup::Stale);
                    let value = Arc::clone(&slot.value);
                    self.spawn_refresh(key, current);
                    return Ok(value);
                }
            }
        }

        metrics::record_cache_lookup(Lookup::Miss);
        self.start(key, current).await
    }

    /// Start (or join) a fetch for `key` and drive it on a spawned task.
    /// Failures are logged and counted.
    fn spawn_refresh(&self, key: K, current: Option<Slot<V>>) {
        let pending = self.start(key.clone(), current);
        tokio::spawn(async move {
            if let Err(err) = pending.await {
                metrics::record_cache_refresh_failure();
                warn!(key = ?key, error = %err, "background refresh failed");
            }
        });
    }

    fn start(&self, key: K, current: Option<Slot<V>>) -> Pending<Result<Arc<V>, E>> {
        let shared = Arc::clone(&self.shared);
        let inflight = Arc::clone(&self.inflight);
        let (pending, _) = self.inflight.join_or_start(key.clone(), move |ticket| {
            async move {
                let ttl = current.as_ref().map(|slot| slot.ttl).unwrap_or(shared.options.default_ttl);
                let previous = current.map(|slot| slot.value);

                let value = Arc::new((shared.fetch)(key.clone(), previous).await?);

                // Set and invalidate drop the registration; capacity eviction
                // does not, so an evicted key still takes the result.
                if inflight.is_current(&key, ticket) {
                    let slot = shared.slot(Arc::clone(&value), ttl, Instant::now() + ttl);
                    shared.entries.insert(key, slot).await;
                } else {
                    debug!(key = ?key, "entry replaced during fetch; result not stored");
                }
                Ok(value)
            }
            .boxed()
        });
        pending
    }

    /// Time until `key` expires; zero once expired, `None` if absent.
    pub async fn remaining_ttl(&self, key: &K) -> Option<Duration> {
        let slot = self.shared.entries.get(key).await?;
        Some(slot.expires_at.saturating_duration_since(Instant::now()))
    }

    pub async fn invalidate(&self, key: &K) {
        self.inflight.forget(key);
        self.shared.entries.invalidate(key).await;
    }

    pub fn is_refreshing(&self, key: &K) -> bool {
        self.inflight.is_pending(key)
    }

    pub async fn entry_count(&self) -> u64 {
        self.shared.entries.run_pending_tasks().await;
        self.shared.entries.entry_count()
    }
}

impl<K, V, E> fmt::Debug for ExpiringCache<K, V, E>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpiringCache")
            .field("options", &self.shared.options)
            .field("entries", &self.shared.entries.entry_count())
            .finish()
    }
}
