//! Redacting containers for secret material.
//!
//! Values read from or written to the store never show up in `Debug`,
//! `Display` or serialized output, and their memory is zeroed on drop.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::error::{Result, SecretsError};

/// Largest payload the store accepts for a single version (64 KiB).
pub const MAX_PAYLOAD_BYTES: usize = 64 * 1024;

/// Materialized secret value held by cache entries.
///
/// Debug prints `SecretString([REDACTED])`, Display prints `[REDACTED]` and
/// serialization emits `"[REDACTED]"`. Deserialization accepts real values so
/// tokens can come from configuration.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Decode a version payload as UTF-8.
    pub fn from_payload(payload: &SecretPayload) -> Result<Self> {
        std::str::from_utf8(payload.as_bytes())
            .map(Self::new)
            .map_err(|e| SecretsError::invalid_argument(format!("payload is not UTF-8: {}", e)))
    }

    /// Exposes the underlying value. Never log the result.
    pub fn expose_secret(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for SecretString {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str("[REDACTED]")
    }
}

impl<'de> Deserialize<'de> for SecretString {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(SecretString)
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretString([REDACTED])")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for SecretString {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for SecretString {}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Immutable byte content of one secret version.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecretPayload(Vec<u8>);

impl SecretPayload {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self(data.into())
    }

    /// Build a payload from a producer's result, rejecting values the store
    /// cannot hold: Secret Manager refuses empty `data` as well as anything
    /// over [`MAX_PAYLOAD_BYTES`]. Checking here keeps the failure ahead of
    /// any write made under the lock.
    pub fn from_produced(value: &[u8]) -> Result<Self> {
        if value.is_empty() {
            return Err(SecretsError::invalid_producer_result("producer returned an empty payload"));
        }
        if value.len() > MAX_PAYLOAD_BYTES {
            return Err(SecretsError::invalid_producer_result(format!(
                "payload of {} bytes exceeds the {} byte limit",
                value.len(),
                MAX_PAYLOAD_BYTES
            )));
        }
        Ok(Self(value.to_vec()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretPayload([REDACTED; {} bytes])", self.0.len())
    }
}

impl From<&str> for SecretPayload {
    fn from(s: &str) -> Self {
        Self::new(s.as_bytes())
    }
}

impl From<String> for SecretPayload {
    fn from(s: String) -> Self {
        Self::new(s.into_bytes())
    }
}
