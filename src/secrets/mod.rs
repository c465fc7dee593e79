//! Secret rotation and caching over a versioned secret store.
//!
//! # Architecture
//!
//! The store is reached through the [`SecretStore`] trait. Everything else is
//! built on top of it:
//! - [`SecretLock`]: acquire/release a cooperative lock on one secret and
//!   rotate it (add a version, retire the previous one) under that lock
//! - [`CachedSecret`]: a materialized value with its refresh policy
//! - [`SecretsCache`]: a keyed TTL cache of entries with de-duplicated refresh
//!
//! # Locking protocol
//!
//! A lock is the `locked_at` annotation on the secret, written with an update
//! conditioned on the etag just read. Parties respect a `locked_at` within the
//! grace period (60 s by default); an older one is treated as abandoned. Losing
//! the etag race surfaces as [`SecretsError::PreconditionFailed`], a live lock
//! held by someone else as [`SecretsError::ConcurrentModification`]. Neither
//! is retried internally.
//!
//! # Supported Stores
//!
//! - **GCP Secret Manager**: [`GcpSecretStore`], REST over `reqwest`
//! - **In-memory**: [`MemorySecretStore`], for tests and local development
//!
//! # Example
//!
//! ```rust,ignore
//! use secretlock::secrets::{
//!     refresh_fn, CacheOptions, MemorySecretStore, SecretsCache, SetOptions,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let cache = SecretsCache::new(Arc::new(MemorySecretStore::new()), CacheOptions::default());
//! cache
//!     .set(
//!         "projects/p/secrets/signing-key",
//!         None,
//!         Some(refresh_fn(|| async { Ok::<_, std::io::Error>(new_signing_key()) })),
//!         SetOptions::with_ttl(Duration::from_secs(3600)),
//!     )
//!     .await?;
//!
//! let entry = cache.get("projects/p/secrets/signing-key").await?;
//! ```
//!
//! # Security Considerations
//!
//! - Values are held in zeroizing containers and never logged
//! - The etag is the only mutual-exclusion primitive; the annotation is advisory
//! - A failed release leaves `locked_at` behind until the grace period expires

pub mod annotations;
pub mod backends;
pub mod cache;
pub mod cached;
pub mod client;
pub mod context;
pub mod error;
pub mod expiring;
pub mod lock;
pub mod memory;
pub mod model;
pub mod names;
pub mod types;

pub use annotations::{LockMarkers, LOCKED_AT, UPDATED_AT};
pub use backends::GcpSecretStore;
pub use cache::{CacheOptions, SecretsCache, SetOptions};
pub use cached::{refresh_fn, CachedSecret, RefreshFn};
pub use client::SecretStore;
pub use context::{CallContext, CallContextSource};
pub use error::{BoxError, ErrorCode, Result, SecretsError};
pub use expiring::{ExpiringCache, ExpiringOptions};
pub use lock::{LockOptions, Rotated, SecretLock};
pub use memory::{MemorySecretStore, StoreCall, StoreOp};
pub use model::{AccessedVersion, Secret, SecretConfig, SecretField, SecretVersion, VersionState};
pub use names::{SecretName, VersionName, VersionRef};
pub use types::{SecretPayload, SecretString};
