//! Read-through cache of [`CachedSecret`] entries.
//!
//! Each key is a secret name. Expired or missing entries are refreshed through
//! [`CachedSecret::refresh`], which may read the store or rotate the secret.
//! Concurrent reads of one key during a refresh share its result, so a burst
//! of readers triggers at most one rotation. A failed refresh is reported to
//! the callers waiting on it and leaves the previous entry in place.
//!
//! # Example
//!
//! ```rust,ignore
//! use secretlock::secrets::{refresh_fn, CacheOptions, SecretsCache, SetOptions};
//!
//! let cache = SecretsCache::new(store, CacheOptions::default());
//! cache
//!     .set(
//!         "projects/p/secrets/api-token",
//!         None,
//!         Some(refresh_fn(|| async { issue_token().await })),
//!         SetOptions::default(),
//!     )
//!     .await?;
//!
//! let token = cache.get("projects/p/secrets/api-token").await?;
//! ```

use futures::future::FutureExt;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::cached::{CachedSecret, RefreshFn};
use super::client::SecretStore;
use super::error::{Result, SecretsError};
use super::expiring::{ExpiringCache, ExpiringOptions, FetchFn};
use super::lock::{LockOptions, SecretLock};
use super::types::SecretString;
use crate::config::CacheSettings;

/// Options for a [`SecretsCache`].
#[derive(Debug, Clone)]
pub struct CacheOptions {
    pub max_capacity: u64,
    pub default_ttl: Duration,
    /// Serve an expired entry immediately and refresh it in the background.
    pub allow_stale: bool,
    /// Options for the lock each entry uses to rotate its secret.
    pub lock: LockOptions,
}

impl CacheOptions {
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_allow_stale(mut self, allow_stale: bool) -> Self {
        self.allow_stale = allow_stale;
        self
    }

    pub fn with_lock_options(mut self, lock: LockOptions) -> Self {
        self.lock = lock;
        self
    }

    fn expiring(&self) -> ExpiringOptions {
        ExpiringOptions {
            max_capacity: self.max_capacity,
            default_ttl: self.default_ttl,
            allow_stale: self.allow_stale,
        }
    }
}

impl Default for CacheOptions {
    fn default() -> Self {
        let expiring = ExpiringOptions::default();
        Self {
            max_capacity: expiring.max_capacity,
            default_ttl: expiring.default_ttl,
            allow_stale: expiring.allow_stale,
            lock: LockOptions::default(),
        }
    }
}

impl From<&CacheSettings> for CacheOptions {
    fn from(settings: &CacheSettings) -> Self {
        Self {
            max_capacity: settings.max_capacity,
            default_ttl: Duration::from_secs(settings.default_ttl_secs),
            allow_stale: settings.allow_stale,
            lock: LockOptions::default(),
        }
    }
}

/// Per-entry options for [`SecretsCache::set`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Entry TTL; the cache default when `None`.
    pub ttl: Option<Duration>,
}

impl SetOptions {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self { ttl: Some(ttl) }
    }
}

struct Inner {
    store: Arc<dyn SecretStore>,
    options: CacheOptions,
    entries: ExpiringCache<String, CachedSecret, SecretsError>,
}

/// Cheap to clone; clones share entries.
#[derive(Clone)]
pub struct SecretsCache {
    inner: Arc<Inner>,
}

impl SecretsCache {
    pub fn new(store: Arc<dyn SecretStore>, options: CacheOptions) -> Self {
        let fetch: FetchFn<String, CachedSecret, SecretsError> = {
            let store = Arc::clone(&store);
            let lock_options = options.lock.clone();
            Arc::new(move |name, previous| {
                let store = Arc::clone(&store);
                let lock_options = lock_options.clone();
                async move {
                    let entry = match previous {
                        Some(entry) => entry,
                        None => {
                            debug!(secret = %name, "creating entry for unregistered secret");
                            let lock = SecretLock::new(&name, store, lock_options)?;
                            Arc::new(CachedSecret::new(lock, None, None))
                        }
                    };
                    entry.refresh().await
                }
                .boxed()
            })
        };

        let entries = ExpiringCache::new(fetch, options.expiring());
        Self { inner: Arc::new(Inner { store, options, entries }) }
    }

    pub fn options(&self) -> &CacheOptions {
        &self.inner.options
    }

    /// Register or replace the entry for `name`.
    ///
    /// Without an initial value the entry starts expired and a refresh is
    /// started right away; reads issued after this returns join it.
    pub async fn set(
        &self,
        name: &str,
        initial: Option<SecretString>,
        refresh: Option<RefreshFn>,
        options: SetOptions,
    ) -> Result<()> {
        let lock =
            SecretLock::new(name, Arc::clone(&self.inner.store), self.inner.options.lock.clone())?;
        let has_initial = initial.is_some();
        let entry = CachedSecret::new(lock, initial, refresh);

        if has_initial {
            self.inner.entries.set(name.to_string(), entry, options.ttl).await;
        } else {
            self.inner.entries.set_refreshing(name.to_string(), entry, options.ttl).await;
        }
        info!(secret = %name, has_initial, "registered cache entry");
        Ok(())
    }

    /// The entry for `name`, refreshed first if it is expired or missing.
    pub async fn get(&self, name: &str) -> Result<Arc<CachedSecret>> {
        self.inner.entries.fetch(name.to_string(), false).await
    }

    /// Refresh the entry for `name` regardless of its remaining TTL.
    pub async fn update(&self, name: &str) -> Result<Arc<CachedSecret>> {
        self.inner.entries.fetch(name.to_string(), true).await
    }

    /// Time until the entry expires; zero once expired, `None` if absent.
    pub async fn remaining_ttl(&self, name: &str) -> Option<Duration> {
        self.inner.entries.remaining_ttl(&name.to_string()).await
    }

    /// The cached entry without refreshing, even if it is expired.
    pub async fn peek(&self, name: &str) -> Option<Arc<CachedSecret>> {
        self.inner.entries.peek(&name.to_string()).await
    }

    pub async fn invalidate(&self, name: &str) {
        self.inner.entries.invalidate(&name.to_string()).await;
    }

    pub async fn entry_count(&self) -> u64 {
        self.inner.entries.entry_count().await
    }

    pub fn is_refreshing(&self, name: &str) -> bool {
        self.inner.entries.is_refreshing(&name.to_string())
    }
}

impl fmt::Debug for SecretsCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretsCache")
            .field("options", &self.inner.options)
            .field("entries", &self.inner.entries)
            .finish()
    }
}
