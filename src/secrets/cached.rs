//! A materialized secret value and the policy for refreshing it.
//!
//! An entry composes a [`SecretLock`] for its secret. Refreshing never mutates
//! the entry; it yields a replacement, so readers holding the old entry keep a
//! consistent snapshot.
//!
//! Which refresh policy applies depends on the entry's state:
//!
//! | refresh fn | value | version known | behaviour |
//! |---|---|---|---|
//! | no  | any | any | read the latest version |
//! | yes | no  | any | read the latest version, rotate if there is none |
//! | yes | yes | no  | adopt the latest version if its payload differs, otherwise rotate |
//! | yes | yes | yes | adopt the latest version if it is newer, otherwise rotate |
//!
//! The payload comparison assumes high-entropy secret values: a remote value
//! that happens to equal the cached one is taken as "not rotated yet".

use futures::future::{BoxFuture, FutureExt};
use std::cmp::Ordering;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, Instrument};

use super::error::{BoxError, Result};
use super::lock::SecretLock;
use super::model::AccessedVersion;
use super::names::compare_versions;
use super::types::SecretString;
use crate::secret_span;

/// Produces a new secret value for rotation.
pub type RefreshFn = Arc<dyn Fn() -> BoxFuture<'static, std::result::Result<String, BoxError>> + Send + Sync>;

/// Wrap an async closure as a [`RefreshFn`].
pub fn refresh_fn<F, Fut, E>(f: F) -> RefreshFn
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<String, E>> + Send + 'static,
    E: Into<BoxError>,
{
    Arc::new(move || {
        let fut = f();
        async move { fut.await.map_err(Into::into) }.boxed()
    })
}

#[derive(Clone)]
pub struct CachedSecret {
    lock: SecretLock,
    value: Option<SecretString>,
    /// Version `value` was read from or written as. `None` for a value that was
    /// never confirmed against the store.
    version_name: Option<String>,
    refresh: Option<RefreshFn>,
}

impl CachedSecret {
    pub fn new(lock: SecretLock, value: Option<SecretString>, refresh: Option<RefreshFn>) -> Self {
        Self { lock, value, version_name: None, refresh }
    }

    pub fn name(&self) -> &str {
        self.lock.name()
    }

    pub fn lock(&self) -> &SecretLock {
        &self.lock
    }

    pub fn value(&self) -> Option<&SecretString> {
        self.value.as_ref()
    }

    pub fn version_name(&self) -> Option<&str> {
        self.version_name.as_deref()
    }

    pub fn has_refresh(&self) -> bool {
        self.refresh.is_some()
    }

    /// Same entry with `value` replaced; the version name is carried over.
    pub fn with_value(&self, value: impl Into<SecretString>) -> Self {
        Self { value: Some(value.into()), ..self.clone() }
    }

    fn with_version(&self, value: SecretString, version_name: String) -> Self {
        Self { value: Some(value), version_name: Some(version_name), ..self.clone() }
    }

    fn adopt(&self, latest: AccessedVersion) -> Result<Self> {
        let value = SecretString::from_payload(&latest.payload)?;
        debug!(version = %latest.name, "adopting latest version");
        Ok(self.with_version(value, latest.name))
    }

    async fn rotate(&self, refresh: RefreshFn) -> Result<Self> {
        let rotated = self.lock.rotate_versioned(move || refresh()).await?;
        Ok(self.with_version(SecretString::new(rotated.value), rotated.version_name))
    }

    /// Produce the refreshed entry.
    pub async fn refresh(&self) -> Result<Self> {
        let policy = match (&self.refresh, &self.value, &self.version_name) {
            (None, _, _) | (Some(_), None, _) => "read",
            (Some(_), Some(_), None) => "compare",
            (Some(_), Some(_), Some(_)) => "advance",
        };
        self.refresh_inner().instrument(secret_span!("refresh", self.name(), policy = policy)).await
    }

    async fn refresh_inner(&self) -> Result<Self> {
        let refresh = match (&self.refresh, &self.value) {
            (Some(refresh), Some(_)) => Arc::clone(refresh),
            (refresh, _) => {
                return match (self.lock.latest_payload().await?, refresh) {
                    (Some(latest), _) => self.adopt(latest),
                    (None, Some(refresh)) => self.rotate(Arc::clone(refresh)).await,
                    (None, None) => Ok(self.clone()),
                };
            }
        };

        let Some(latest) = self.lock.latest_payload().await? else {
            return self.rotate(refresh).await;
        };

        let remote_is_ahead = match (&self.version_name, &self.value) {
            (Some(known), _) => compare_versions(&latest.name, known) == Ordering::Greater,
            (None, Some(value)) => latest.payload.as_bytes() != value.expose_secret().as_bytes(),
            (None, None) => false,
        };

        if remote_is_ahead {
            self.adopt(latest)
        } else {
            self.rotate(refresh).await
        }
    }
}

impl fmt::Debug for CachedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedSecret")
            .field("name", &self.name())
            .field("value", &self.value)
            .field("version_name", &self.version_name)
            .field("has_refresh", &self.refresh.is_some())
            .finish()
    }
}
