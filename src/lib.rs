//! # secretlock
//!
//! Optimistic-lock rotation for secrets held in a versioned secret store, and
//! a read-through cache layered on top of it.
//!
//! ## Architecture
//!
//! ```text
//! SecretsCache → ExpiringCache → CachedSecret → SecretLock → SecretStore
//!                                                               ↓
//!                                            GcpSecretStore / MemorySecretStore
//! ```
//!
//! ## Core Components
//!
//! - **SecretLock**: cooperative lock written as a `locked_at` annotation and
//!   guarded by the store's etag check; rotates a secret under that lock
//! - **CachedSecret**: a materialized value plus the policy deciding whether
//!   a refresh adopts a newer remote version or rotates
//! - **SecretsCache**: TTL cache of entries where concurrent readers share one
//!   refresh
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use secretlock::config::Settings;
//! use secretlock::secrets::{GcpSecretStore, LockOptions, SecretLock};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> secretlock::Result<()> {
//!     let settings = Settings::from_env()?;
//!     secretlock::observability::init_logging(&settings.logging);
//!
//!     let store = Arc::new(GcpSecretStore::from_settings(&settings.gcp)?);
//!     let lock = SecretLock::new(
//!         "projects/my-project/secrets/db-password",
//!         store,
//!         LockOptions::from(&settings.lock),
//!     )?;
//!
//!     lock.rotate(|| async { Ok::<_, std::io::Error>("new-password".to_string()) }).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod observability;
pub mod secrets;
pub mod utils;

pub use secrets::{Result, SecretsError};

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
