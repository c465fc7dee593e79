//! Cooperative lock over a single secret, and the rotation cycle built on it.
//!
//! There is no lock service. A holder writes the `locked_at` annotation with a
//! write conditioned on the etag it just read; every party agrees to respect a
//! `locked_at` younger than the grace period. Two writers racing on the same
//! etag cannot both succeed, so the etag check is the actual mutual exclusion.
//! A holder that dies leaves its annotation behind, and the next locker treats
//! it as abandoned once the grace period has passed.
//!
//! # Example
//!
//! ```rust,ignore
//! use secretlock::secrets::{LockOptions, MemorySecretStore, SecretLock};
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemorySecretStore::new());
//! let lock = SecretLock::new("projects/p/secrets/db-password", store, LockOptions::default())?;
//!
//! let password = lock.rotate(|| async { Ok::<_, std::io::Error>(generate_password()) }).await?;
//! ```

use chrono::Duration;
use futures::future::FutureExt;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};

use super::annotations::{self, LockMarkers, LOCKED_AT, UPDATED_AT};
use super::client::SecretStore;
use super::context::{CallContext, CallContextSource};
use super::error::{BoxError, Result, SecretsError};
use super::model::{AccessedVersion, Secret, SecretField, SecretVersion};
use super::names::SecretName;
use super::types::SecretPayload;
use crate::config::LockSettings;
use crate::observability::metrics::{self, Outcome};
use crate::utils::clock::{Clock, SystemClock};
use crate::utils::inflight::InFlight;

pub const DEFAULT_GRACE_PERIOD_MS: i64 = 60_000;

/// Options for a [`SecretLock`].
#[derive(Debug, Clone)]
pub struct LockOptions {
    /// How long another holder's `locked_at` is honored.
    pub grace_period: Duration,
    /// Metadata attached to every store call.
    pub context: CallContextSource,
    pub clock: Arc<dyn Clock>,
}

impl LockOptions {
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn with_context(mut self, context: impl Into<CallContextSource>) -> Self {
        self.context = context.into();
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            grace_period: Duration::milliseconds(DEFAULT_GRACE_PERIOD_MS),
            context: CallContextSource::None,
            clock: Arc::new(SystemClock),
        }
    }
}

impl From<&LockSettings> for LockOptions {
    fn from(settings: &LockSettings) -> Self {
        let grace_ms = i64::try_from(settings.grace_period_ms).unwrap_or(i64::MAX);
        Self::default().with_grace_period(Duration::milliseconds(grace_ms))
    }
}

/// Result of a rotation: the producer's value and the version it was stored as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rotated<T> {
    pub value: T,
    pub version_name: String,
}

struct Inner {
    name: SecretName,
    store: Arc<dyn SecretStore>,
    options: LockOptions,
    /// Metadata written by this instance's own successful lock. Present only
    /// while this instance believes it holds the lock.
    snapshot: Mutex<Option<Secret>>,
    reads: InFlight<String, Result<Secret>>,
    /// Held from acquire to release by the rotation in progress.
    rotation: Arc<Mutex<()>>,
}

/// Lock controller for one secret.
///
/// Clones share lock state. Independently constructed controllers for the same
/// secret are separate parties and exclude each other through the store.
#[derive(Clone)]
pub struct SecretLock {
    inner: Arc<Inner>,
}

impl SecretLock {
    pub fn new(
        name: impl AsRef<str>,
        store: Arc<dyn SecretStore>,
        options: LockOptions,
    ) -> Result<Self> {
        let name = SecretName::parse(name.as_ref())?;
        if options.grace_period < Duration::zero() {
            return Err(SecretsError::invalid_argument("grace period must not be negative"));
        }
        Ok(Self {
            inner: Arc::new(Inner {
                name,
                store,
                options,
                snapshot: Mutex::new(None),
                reads: InFlight::new(),
                rotation: Arc::new(Mutex::new(())),
            }),
        })
    }

    pub fn name(&self) -> &str {
        self.inner.name.as_str()
    }

    pub fn store(&self) -> &Arc<dyn SecretStore> {
        &self.inner.store
    }

    pub fn options(&self) -> &LockOptions {
        &self.inner.options
    }

    /// Whether this instance currently holds the lock.
    pub async fn is_locked(&self) -> bool {
        self.inner.snapshot.lock().await.is_some()
    }

    fn context(&self) -> CallContext {
        self.inner.options.context.resolve()
    }

    /// Read secret metadata, sharing a read that is already outstanding.
    async fn read_secret(&self) -> Result<Secret> {
        let store = Arc::clone(&self.inner.store);
        let name = self.name().to_string();
        let ctx = self.context();
        self.inner
            .reads
            .run(name.clone(), move || async move { store.get_secret(&name, &ctx).await }.boxed())
            .await
    }

    /// Take the lock.
    ///
    /// Re-entrant: while this instance holds the lock the held snapshot is
    /// returned without touching the store.
    ///
    /// # Errors
    ///
    /// - [`SecretsError::ConcurrentModification`] if another party's lock is
    ///   still within the grace period. Nothing is written.
    /// - [`SecretsError::PreconditionFailed`] if the secret changed between the
    ///   read and the conditioned write.
    #[instrument(skip(self), fields(secret = %self.inner.name))]
    pub async fn acquire(&self) -> Result<Secret> {
        if let Some(held) = self.inner.snapshot.lock().await.as_ref() {
            return Ok(held.clone());
        }

        let current = self.read_secret().await?;

        let mut snapshot = self.inner.snapshot.lock().await;
        if let Some(held) = snapshot.as_ref() {
            // A concurrent acquire on this instance won while we waited.
            return Ok(held.clone());
        }

        let now = self.inner.options.clock.now();
        let markers = LockMarkers::read(&current.annotations);
        if let Some(locked_at) = markers.locked_at {
            if markers.is_locked(self.inner.options.grace_period, now) {
                debug!(%locked_at, "lock held by another party");
                metrics::record_lock_acquisition(Outcome::Contended);
                return Err(SecretsError::concurrent_modification(self.name(), locked_at));
            }
            warn!(%locked_at, "taking over stale lock");
        }

        let mut desired = current;
        annotations::write_marker(&mut desired.annotations, LOCKED_AT, Some(now));
        let result =
            self.inner.store.update_secret(&desired, &[SecretField::Annotations], &self.context()).await;
        metrics::record_lock_acquisition(Outcome::of(&result));

        let locked = result?;
        *snapshot = Some(locked.clone());
        info!(etag = %locked.etag, "lock acquired");
        Ok(locked)
    }

    /// Release the lock. A no-op when this instance does not hold it.
    ///
    /// Local state is cleared before the write, so the instance is usable again
    /// even if the write fails. A failed write leaves `locked_at` in the store
    /// until the grace period expires; the error is returned to the caller.
    #[instrument(skip(self), fields(secret = %self.inner.name))]
    pub async fn release(&self) -> Result<()> {
        let held = self.inner.snapshot.lock().await.take();
        self.inner.reads.forget(&self.name().to_string());

        let Some(mut held) = held else {
            return Ok(());
        };

        annotations::write_marker(&mut held.annotations, LOCKED_AT, None);
        match self
            .inner
            .store
            .update_secret(&held, &[SecretField::Annotations], &self.context())
            .await
        {
            Ok(_) => {
                info!("lock released");
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "failed to clear lock annotation");
                Err(err)
            }
        }
    }

    /// Rotate the secret to the value returned by `producer`.
    ///
    /// Returns the produced value. See [`SecretLock::rotate_versioned`].
    pub async fn rotate<F, Fut, T, E>(&self, producer: F) -> Result<T>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = std::result::Result<T, E>> + Send,
        T: AsRef<[u8]> + Send,
        E: Into<BoxError>,
    {
        self.rotate_versioned(producer).await.map(|rotated| rotated.value)
    }

    /// Rotate the secret and report the version the value was stored as.
    ///
    /// Under the lock: read the latest version, run the producer, add the new
    /// version, destroy the previous one (deferred if the secret has a
    /// retention policy), stamp `updated_at`. The lock is released on every
    /// exit path. If the producer fails or returns an unstorable value nothing
    /// is written.
    ///
    /// Rotations through one instance (or its clones) run one at a time; a
    /// second call waits for the first to release before taking the lock.
    ///
    /// # Errors
    ///
    /// The first error of the cycle wins over a failing release. A release
    /// failure after an otherwise successful cycle is returned as is.
    #[instrument(skip(self, producer), fields(secret = %self.inner.name))]
    pub async fn rotate_versioned<F, Fut, T, E>(&self, producer: F) -> Result<Rotated<T>>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = std::result::Result<T, E>> + Send,
        T: AsRef<[u8]> + Send,
        E: Into<BoxError>,
    {
        let turn = Arc::clone(&self.inner.rotation).lock_owned().await;
        if let Err(err) = self.acquire().await {
            metrics::record_rotation(Outcome::of_error(&err));
            return Err(err);
        }

        let guard = ReleaseOnDrop::new(self.clone(), turn);
        let outcome = self.rotate_locked(producer).await;
        let turn = guard.disarm();
        let released = self.release().await;
        drop(turn);

        let result = match (outcome, released) {
            (Ok(rotated), Ok(())) => Ok(rotated),
            (Err(err), Ok(())) => Err(err),
            (Ok(_), Err(release_err)) => Err(release_err),
            (Err(err), Err(release_err)) => {
                warn!(error = %release_err, "release failed after rotation error");
                Err(err)
            }
        };
        metrics::record_rotation(Outcome::of(&result));
        result
    }

    async fn rotate_locked<F, Fut, T, E>(&self, producer: F) -> Result<Rotated<T>>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = std::result::Result<T, E>> + Send,
        T: AsRef<[u8]> + Send,
        E: Into<BoxError>,
    {
        let previous = self.latest_version().await?;

        let value = producer().await.map_err(SecretsError::producer)?;
        let payload = SecretPayload::from_produced(value.as_ref())?;

        let ctx = self.context();
        let created = self.inner.store.add_secret_version(self.name(), &payload, &ctx).await?;
        info!(version = %created.name, "added secret version");

        if let Some(previous) = previous.filter(SecretVersion::is_destroyable) {
            let etag = Some(previous.etag.as_str()).filter(|etag| !etag.is_empty());
            let retired =
                self.inner.store.destroy_secret_version(&previous.name, etag, &ctx).await?;
            info!(version = %retired.name, state = %retired.state.as_str(), "retired previous version");
        }

        let mut snapshot = self.inner.snapshot.lock().await;
        let Some(held) = snapshot.as_ref() else {
            return Err(SecretsError::precondition_failed(self.name(), "lock lost during rotation"));
        };
        let mut desired = held.clone();
        annotations::write_marker(
            &mut desired.annotations,
            UPDATED_AT,
            Some(self.inner.options.clock.now()),
        );
        let updated =
            self.inner.store.update_secret(&desired, &[SecretField::Annotations], &ctx).await?;
        *snapshot = Some(updated);

        Ok(Rotated { value, version_name: created.name })
    }

    /// Metadata of the latest version, or `None` if the secret has none.
    pub async fn latest_version(&self) -> Result<Option<SecretVersion>> {
        found(self.require_latest_version().await)
    }

    /// Metadata of the latest version; a missing version is an error.
    pub async fn require_latest_version(&self) -> Result<SecretVersion> {
        self.inner
            .store
            .get_secret_version(&self.inner.name.latest_version(), &self.context())
            .await
    }

    /// Payload of the latest version, or `None` if the secret has none.
    pub async fn latest_payload(&self) -> Result<Option<AccessedVersion>> {
        found(self.require_latest_payload().await)
    }

    /// Payload of the latest version; a missing version is an error.
    pub async fn require_latest_payload(&self) -> Result<AccessedVersion> {
        self.inner
            .store
            .access_secret_version(&self.inner.name.latest_version(), &self.context())
            .await
    }
}

impl fmt::Debug for SecretLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretLock")
            .field("name", &self.inner.name)
            .field("grace_period", &self.inner.options.grace_period)
            .finish_non_exhaustive()
    }
}

/// Translate not-found into `None`.
fn found<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(err),
    }
}

/// Spawns a release if a rotation is dropped while holding the lock. The
/// rotation turn is kept until that release has finished.
struct ReleaseOnDrop {
    armed: Option<(SecretLock, OwnedMutexGuard<()>)>,
}

impl ReleaseOnDrop {
    fn new(lock: SecretLock, turn: OwnedMutexGuard<()>) -> Self {
        Self { armed: Some((lock, turn)) }
    }

    fn disarm(mut self) -> Option<OwnedMutexGuard<()>> {
        self.armed.take().map(|(_, turn)| turn)
    }
}

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        let Some((lock, turn)) = self.armed.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = lock.release().await {
                        warn!(secret = %lock.name(), error = %err, "release after cancelled rotation failed");
                    }
                    drop(turn);
                });
            }
            Err(_) => {
                warn!(secret = %lock.name(), "rotation dropped outside a runtime; lock left to expire");
            }
        }
    }
}
