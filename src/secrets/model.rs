//! Store-side data model: secret metadata and secret versions.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::types::SecretPayload;

/// Secret metadata as held by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Secret {
    /// `<scope>/secrets/<id>`
    pub name: String,

    /// Opaque tag that changes on every metadata write.
    pub etag: String,

    /// Free-form annotations; `locked_at` and `updated_at` are reserved.
    pub annotations: HashMap<String, String>,

    /// When set, destroying a version only disables it and schedules the
    /// destruction this far in the future.
    pub version_destroy_ttl: Option<Duration>,

    pub create_time: Option<DateTime<Utc>>,
}

/// Metadata fields an update is allowed to touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecretField {
    Annotations,
    VersionDestroyTtl,
}

impl SecretField {
    /// Field path used in update masks.
    pub fn mask_path(&self) -> &'static str {
        match self {
            Self::Annotations => "annotations",
            Self::VersionDestroyTtl => "version_destroy_ttl",
        }
    }
}

/// Settings for a secret being created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecretConfig {
    pub annotations: HashMap<String, String>,
    pub version_destroy_ttl: Option<Duration>,
}

impl SecretConfig {
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn with_version_destroy_ttl(mut self, ttl: Duration) -> Self {
        self.version_destroy_ttl = Some(ttl);
        self
    }
}

/// Lifecycle state of a secret version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VersionState {
    Enabled,
    Disabled,
    /// Terminal; the payload is gone.
    Destroyed,
}

impl VersionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enabled => "ENABLED",
            Self::Disabled => "DISABLED",
            Self::Destroyed => "DESTROYED",
        }
    }
}

/// Metadata of one immutable secret version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretVersion {
    /// `<secret-name>/versions/<ordinal>`
    pub name: String,
    pub state: VersionState,
    pub etag: String,

    pub create_time: Option<DateTime<Utc>>,

    pub destroy_time: Option<DateTime<Utc>>,

    /// Set when destruction was deferred by the secret's retention policy.
    pub scheduled_destroy_time: Option<DateTime<Utc>>,
}

impl SecretVersion {
    /// Whether a destroy request would still change anything.
    pub fn is_destroyable(&self) -> bool {
        self.state != VersionState::Destroyed && self.scheduled_destroy_time.is_none()
    }
}

/// Payload of an accessed version together with the concrete version name
/// (the `latest` alias resolved).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessedVersion {
    pub name: String,
    pub payload: SecretPayload,
}
