//! Common test utilities for all integration tests.
//!
//! Provides an in-memory store on a manual clock and helpers for creating
//! secrets and lock instances against it.

#![allow(dead_code)]
#![allow(clippy::duplicate_mod)]

use chrono::{DateTime, TimeZone, Utc};
use secretlock::secrets::{
    CallContext, LockOptions, MemorySecretStore, SecretConfig, SecretLock, SecretStore,
    SecretString,
};
use secretlock::utils::ManualClock;
use std::sync::Arc;

pub const PARENT: &str = "projects/test-project";

/// In-memory store and the clock it shares with every lock built from it.
pub struct TestEnv {
    pub store: MemorySecretStore,
    pub clock: ManualClock,
}

impl TestEnv {
    pub fn new() -> Self {
        let clock = ManualClock::new(epoch());
        let store = MemorySecretStore::with_clock(Arc::new(clock.clone()));
        Self { store, clock }
    }

    /// Create `<PARENT>/secrets/<id>` and return its full name.
    pub async fn create_secret(&self, id: &str, config: SecretConfig) -> String {
        self.store
            .create_secret(PARENT, id, config, &CallContext::new())
            .await
            .expect("create secret")
            .name
    }

    /// Add a version with `value` and return the version name.
    pub async fn add_version(&self, secret: &str, value: &str) -> String {
        self.store
            .add_secret_version(secret, &value.into(), &CallContext::new())
            .await
            .expect("add version")
            .name
    }

    /// Payload of the latest version as a string.
    pub async fn latest_value(&self, secret: &str) -> String {
        let accessed = self
            .store
            .access_secret_version(&format!("{}/versions/latest", secret), &CallContext::new())
            .await
            .expect("access latest");
        SecretString::from_payload(&accessed.payload)
            .expect("utf-8 payload")
            .expose_secret()
            .to_string()
    }

    pub fn lock_options(&self) -> LockOptions {
        LockOptions::default().with_clock(Arc::new(self.clock.clone()))
    }

    /// A new, independent lock instance for `secret`.
    pub fn lock(&self, secret: &str) -> SecretLock {
        self.lock_with(secret, self.lock_options())
    }

    pub fn lock_with(&self, secret: &str, options: LockOptions) -> SecretLock {
        SecretLock::new(secret, Arc::new(self.store.clone()), options).expect("valid secret name")
    }

    pub fn store_handle(&self) -> Arc<dyn SecretStore> {
        Arc::new(self.store.clone())
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}
