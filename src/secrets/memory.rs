//! In-process secret store.
//!
//! Implements the full [`SecretStore`] contract in memory: etags regenerated on
//! every metadata write, sequential version ordinals, the `latest` alias,
//! deferred destruction under a retention policy. Intended for tests and local
//! development; nothing is persisted.
//!
//! Every call yields to the scheduler once before touching state, so
//! concurrently driven callers interleave the way they would against a remote
//! store. Calls are recorded with their resolved [`CallContext`] and one-shot
//! failures can be injected per operation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::client::SecretStore;
use super::context::CallContext;
use super::error::{Result, SecretsError};
use super::model::{AccessedVersion, Secret, SecretConfig, SecretField, SecretVersion, VersionState};
use super::names::{SecretName, VersionName, VersionRef};
use super::types::{SecretPayload, MAX_PAYLOAD_BYTES};
use crate::utils::clock::{Clock, SystemClock};

/// Store operation, used for call accounting and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    CreateSecret,
    GetSecret,
    UpdateSecret,
    GetVersion,
    AccessVersion,
    AddVersion,
    EnableVersion,
    DisableVersion,
    DestroyVersion,
    ListVersions,
}

impl StoreOp {
    /// Whether the operation mutates the store.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Self::CreateSecret
                | Self::UpdateSecret
                | Self::AddVersion
                | Self::EnableVersion
                | Self::DisableVersion
                | Self::DestroyVersion
        )
    }
}

impl fmt::Display for StoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One recorded store call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCall {
    pub op: StoreOp,
    pub target: String,
    pub context: CallContext,
}

struct StoredVersion {
    meta: SecretVersion,
    payload: Option<SecretPayload>,
}

struct StoredSecret {
    secret: Secret,
    versions: Vec<StoredVersion>,
}

impl StoredSecret {
    /// Apply destructions whose scheduled time has passed.
    fn settle(&mut self, now: DateTime<Utc>) {
        for version in &mut self.versions {
            if let Some(at) = version.meta.scheduled_destroy_time {
                if at <= now {
                    version.meta.state = VersionState::Destroyed;
                    version.meta.destroy_time = Some(at);
                    version.meta.scheduled_destroy_time = None;
                    version.payload = None;
                }
            }
        }
    }

    fn resolve(&mut self, version: VersionRef, full_name: &str) -> Result<&mut StoredVersion> {
        let index = match version {
            VersionRef::Ordinal(n) => usize::try_from(n - 1).ok(),
            VersionRef::Latest => {
                self.versions.iter().rposition(|v| v.meta.state != VersionState::Destroyed)
            }
        };
        index
            .and_then(|i| self.versions.get_mut(i))
            .ok_or_else(|| SecretsError::not_found(full_name))
    }
}

#[derive(Default)]
struct State {
    secrets: HashMap<String, StoredSecret>,
    calls: Vec<StoreCall>,
    faults: HashMap<StoreOp, VecDeque<SecretsError>>,
}

/// In-memory [`SecretStore`].
#[derive(Clone)]
pub struct MemorySecretStore {
    state: Arc<Mutex<State>>,
    clock: Arc<dyn Clock>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { state: Arc::new(Mutex::new(State::default())), clock }
    }

    /// Make the next call of `op` fail with `error`. Injected failures queue up.
    pub async fn fail_next(&self, op: StoreOp, error: SecretsError) {
        self.state.lock().await.faults.entry(op).or_default().push_back(error);
    }

    /// All calls made so far, oldest first.
    pub async fn calls(&self) -> Vec<StoreCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn call_count(&self, op: StoreOp) -> usize {
        self.state.lock().await.calls.iter().filter(|c| c.op == op).count()
    }

    pub async fn write_count(&self) -> usize {
        self.state.lock().await.calls.iter().filter(|c| c.op.is_write()).count()
    }

    pub async fn clear_calls(&self) {
        self.state.lock().await.calls.clear();
    }

    /// Number of versions ever added to `secret`, destroyed ones included.
    pub async fn version_count(&self, secret: &str) -> usize {
        self.state.lock().await.secrets.get(secret).map(|s| s.versions.len()).unwrap_or(0)
    }

    /// Record the call, yield once, then surface any injected failure.
    async fn begin(&self, op: StoreOp, target: &str, ctx: &CallContext) -> Result<()> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock().await;
        state.calls.push(StoreCall { op, target: target.to_string(), context: ctx.clone() });
        debug!(op = %op, target = %target, "memory store call");
        match state.faults.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn new_etag() -> String {
        format!("\"{}\"", Uuid::new_v4().simple())
    }

    async fn change_version<F>(
        &self,
        op: StoreOp,
        name: &str,
        etag: Option<&str>,
        ctx: &CallContext,
        change: F,
    ) -> Result<SecretVersion>
    where
        F: FnOnce(&mut StoredVersion, &Secret, DateTime<Utc>) -> Result<()> + Send,
    {
        self.begin(op, name, ctx).await?;
        let parsed = VersionName::parse(name)?;
        let now = self.clock.now();

        let mut state = self.state.lock().await;
        let stored = state
            .secrets
            .get_mut(parsed.secret().as_str())
            .ok_or_else(|| SecretsError::not_found(name))?;
        stored.settle(now);
        let secret = stored.secret.clone();
        let version = stored.resolve(parsed.version(), name)?;

        if let Some(expected) = etag {
            if !expected.is_empty() && expected != version.meta.etag {
                return Err(SecretsError::precondition_failed(name, "version etag mismatch"));
            }
        }

        change(version, &secret, now)?;
        version.meta.etag = Self::new_etag();
        Ok(version.meta.clone())
    }
}

impl Default for MemorySecretStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemorySecretStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySecretStore").field("clock", &self.clock).finish_non_exhaustive()
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn create_secret(
        &self,
        parent: &str,
        secret_id: &str,
        config: SecretConfig,
        ctx: &CallContext,
    ) -> Result<Secret> {
        let name = SecretName::from_parts(parent, secret_id)?;
        self.begin(StoreOp::CreateSecret, name.as_str(), ctx).await?;

        let mut state = self.state.lock().await;
        if state.secrets.contains_key(name.as_str()) {
            return Err(SecretsError::already_exists(name.as_str()));
        }

        let secret = Secret {
            name: name.as_str().to_string(),
            etag: Self::new_etag(),
            annotations: config.annotations,
            version_destroy_ttl: config.version_destroy_ttl,
            create_time: Some(self.clock.now()),
        };
        state.secrets.insert(
            secret.name.clone(),
            StoredSecret { secret: secret.clone(), versions: Vec::new() },
        );
        Ok(secret)
    }

    async fn get_secret(&self, name: &str, ctx: &CallContext) -> Result<Secret> {
        self.begin(StoreOp::GetSecret, name, ctx).await?;
        let state = self.state.lock().await;
        state.secrets.get(name).map(|s| s.secret.clone()).ok_or_else(|| SecretsError::not_found(name))
    }

    async fn update_secret(
        &self,
        secret: &Secret,
        fields: &[SecretField],
        ctx: &CallContext,
    ) -> Result<Secret> {
        self.begin(StoreOp::UpdateSecret, &secret.name, ctx).await?;
        let mut state = self.state.lock().await;
        let stored = state
            .secrets
            .get_mut(&secret.name)
            .ok_or_else(|| SecretsError::not_found(&secret.name))?;

        if !secret.etag.is_empty() && secret.etag != stored.secret.etag {
            return Err(SecretsError::precondition_failed(&secret.name, "etag mismatch"));
        }

        for field in fields {
            match field {
                SecretField::Annotations => {
                    stored.secret.annotations = secret.annotations.clone();
                }
                SecretField::VersionDestroyTtl => {
                    stored.secret.version_destroy_ttl = secret.version_destroy_ttl;
                }
            }
        }
        stored.secret.etag = Self::new_etag();
        Ok(stored.secret.clone())
    }

    async fn get_secret_version(&self, name: &str, ctx: &CallContext) -> Result<SecretVersion> {
        self.begin(StoreOp::GetVersion, name, ctx).await?;
        let parsed = VersionName::parse(name)?;
        let now = self.clock.now();

        let mut state = self.state.lock().await;
        let stored = state
            .secrets
            .get_mut(parsed.secret().as_str())
            .ok_or_else(|| SecretsError::not_found(name))?;
        stored.settle(now);
        Ok(stored.resolve(parsed.version(), name)?.meta.clone())
    }

    async fn access_secret_version(
        &self,
        name: &str,
        ctx: &CallContext,
    ) -> Result<AccessedVersion> {
        self.begin(StoreOp::AccessVersion, name, ctx).await?;
        let parsed = VersionName::parse(name)?;
        let now = self.clock.now();

        let mut state = self.state.lock().await;
        let stored = state
            .secrets
            .get_mut(parsed.secret().as_str())
            .ok_or_else(|| SecretsError::not_found(name))?;
        stored.settle(now);
        let version = stored.resolve(parsed.version(), name)?;

        match (&version.meta.state, &version.payload) {
            (VersionState::Enabled, Some(payload)) => {
                Ok(AccessedVersion { name: version.meta.name.clone(), payload: payload.clone() })
            }
            (VersionState::Disabled, _) => {
                Err(SecretsError::precondition_failed(&version.meta.name, "version is disabled"))
            }
            _ => Err(SecretsError::precondition_failed(&version.meta.name, "version is destroyed")),
        }
    }

    async fn add_secret_version(
        &self,
        parent: &str,
        payload: &SecretPayload,
        ctx: &CallContext,
    ) -> Result<SecretVersion> {
        self.begin(StoreOp::AddVersion, parent, ctx).await?;
        if payload.is_empty() {
            return Err(SecretsError::invalid_argument("payload must not be empty"));
        }
        if payload.len() > MAX_PAYLOAD_BYTES {
            return Err(SecretsError::invalid_argument("payload exceeds 64 KiB"));
        }
        let name = SecretName::parse(parent)?;
        let now = self.clock.now();

        let mut state = self.state.lock().await;
        let stored =
            state.secrets.get_mut(parent).ok_or_else(|| SecretsError::not_found(parent))?;

        let ordinal = stored.versions.len() as u64 + 1;
        let meta = SecretVersion {
            name: name.version(ordinal),
            state: VersionState::Enabled,
            etag: Self::new_etag(),
            create_time: Some(now),
            destroy_time: None,
            scheduled_destroy_time: None,
        };
        stored.versions.push(StoredVersion { meta: meta.clone(), payload: Some(payload.clone()) });
        Ok(meta)
    }

    async fn enable_secret_version(
        &self,
        name: &str,
        etag: Option<&str>,
        ctx: &CallContext,
    ) -> Result<SecretVersion> {
        self.change_version(StoreOp::EnableVersion, name, etag, ctx, |version, _, _| {
            if version.meta.state == VersionState::Destroyed {
                return Err(SecretsError::precondition_failed(
                    &version.meta.name,
                    "version is destroyed",
                ));
            }
            version.meta.state = VersionState::Enabled;
            version.meta.scheduled_destroy_time = None;
            Ok(())
        })
        .await
    }

    async fn disable_secret_version(
        &self,
        name: &str,
        etag: Option<&str>,
        ctx: &CallContext,
    ) -> Result<SecretVersion> {
        self.change_version(StoreOp::DisableVersion, name, etag, ctx, |version, _, _| {
            if version.meta.state == VersionState::Destroyed {
                return Err(SecretsError::precondition_failed(
                    &version.meta.name,
                    "version is destroyed",
                ));
            }
            version.meta.state = VersionState::Disabled;
            Ok(())
        })
        .await
    }

    async fn destroy_secret_version(
        &self,
        name: &str,
        etag: Option<&str>,
        ctx: &CallContext,
    ) -> Result<SecretVersion> {
        self.change_version(StoreOp::DestroyVersion, name, etag, ctx, |version, secret, now| {
            if version.meta.state == VersionState::Destroyed {
                return Err(SecretsError::precondition_failed(
                    &version.meta.name,
                    "version is already destroyed",
                ));
            }
            match secret.version_destroy_ttl {
                Some(ttl) => {
                    version.meta.state = VersionState::Disabled;
                    version.meta.scheduled_destroy_time = Some(now + ttl);
                }
                None => {
                    version.meta.state = VersionState::Destroyed;
                    version.meta.destroy_time = Some(now);
                    version.payload = None;
                }
            }
            Ok(())
        })
        .await
    }

    async fn list_secret_versions(
        &self,
        parent: &str,
        ctx: &CallContext,
    ) -> Result<Vec<SecretVersion>> {
        self.begin(StoreOp::ListVersions, parent, ctx).await?;
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let stored =
            state.secrets.get_mut(parent).ok_or_else(|| SecretsError::not_found(parent))?;
        stored.settle(now);
        Ok(stored.versions.iter().rev().map(|v| v.meta.clone()).collect())
    }
}
