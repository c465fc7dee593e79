//! The remote secret store contract.

use async_trait::async_trait;

use super::context::CallContext;
use super::error::Result;
use super::model::{AccessedVersion, Secret, SecretConfig, SecretField, SecretVersion};
use super::types::SecretPayload;

/// Operations the coordination layer invokes on a versioned secret store.
///
/// The store is the single source of truth. Its version tag (etag) is the only
/// mutual-exclusion primitive: [`SecretStore::update_secret`] must reject a
/// write whose `secret.etag` no longer matches the stored tag.
///
/// Every call receives the [`CallContext`] resolved for that call; remote
/// implementations forward it as request metadata.
///
/// # Errors
///
/// Implementations report failures with the crate's taxonomy:
/// - [`SecretsError::NotFound`](super::SecretsError::NotFound) for missing secrets or versions
/// - [`SecretsError::AlreadyExists`](super::SecretsError::AlreadyExists) on duplicate creation
/// - [`SecretsError::PreconditionFailed`](super::SecretsError::PreconditionFailed) on etag
///   mismatch or when accessing a disabled/destroyed version
/// - [`SecretsError::ConnectionFailed`](super::SecretsError::ConnectionFailed) when unreachable
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Create `<parent>/secrets/<secret_id>` with no versions.
    async fn create_secret(
        &self,
        parent: &str,
        secret_id: &str,
        config: SecretConfig,
        ctx: &CallContext,
    ) -> Result<Secret>;

    async fn get_secret(&self, name: &str, ctx: &CallContext) -> Result<Secret>;

    /// Write the masked fields of `secret`, conditioned on `secret.etag`.
    async fn update_secret(
        &self,
        secret: &Secret,
        fields: &[SecretField],
        ctx: &CallContext,
    ) -> Result<Secret>;

    /// Version metadata; `name` may use the `latest` alias.
    async fn get_secret_version(&self, name: &str, ctx: &CallContext) -> Result<SecretVersion>;

    /// Version payload; `name` may use the `latest` alias.
    async fn access_secret_version(&self, name: &str, ctx: &CallContext)
        -> Result<AccessedVersion>;

    async fn add_secret_version(
        &self,
        parent: &str,
        payload: &SecretPayload,
        ctx: &CallContext,
    ) -> Result<SecretVersion>;

    async fn enable_secret_version(
        &self,
        name: &str,
        etag: Option<&str>,
        ctx: &CallContext,
    ) -> Result<SecretVersion>;

    async fn disable_secret_version(
        &self,
        name: &str,
        etag: Option<&str>,
        ctx: &CallContext,
    ) -> Result<SecretVersion>;

    /// Destroy a version. With a retention policy on the secret the version is
    /// disabled and given a `scheduled_destroy_time` instead.
    async fn destroy_secret_version(
        &self,
        name: &str,
        etag: Option<&str>,
        ctx: &CallContext,
    ) -> Result<SecretVersion>;

    /// All versions of a secret, newest first.
    async fn list_secret_versions(
        &self,
        parent: &str,
        ctx: &CallContext,
    ) -> Result<Vec<SecretVersion>>;
}
