//! Resource name parsing for secrets and secret versions.
//!
//! Secret names look like `<scope>/secrets/<id>` (for Google Secret Manager the
//! scope is `projects/<project>`). Version names append `/versions/<ordinal>`
//! or the `latest` alias.

use std::cmp::Ordering;
use std::fmt;

use super::error::{Result, SecretsError};

const SECRETS_SEGMENT: &str = "/secrets/";
const VERSIONS_SEGMENT: &str = "/versions/";

/// Version alias that resolves to the highest non-destroyed ordinal.
pub const LATEST: &str = "latest";

/// Validated `<scope>/secrets/<id>` resource name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecretName {
    full: String,
    split: usize,
}

impl SecretName {
    pub fn parse(name: &str) -> Result<Self> {
        let split = name.rfind(SECRETS_SEGMENT).ok_or_else(|| {
            SecretsError::invalid_argument(format!(
                "secret name '{}' must look like <scope>/secrets/<id>",
                name
            ))
        })?;
        let scope = &name[..split];
        let id = &name[split + SECRETS_SEGMENT.len()..];

        if scope.is_empty() || scope.starts_with('/') {
            return Err(SecretsError::invalid_argument(format!(
                "secret name '{}' has an empty scope",
                name
            )));
        }
        if id.is_empty() || id.contains('/') {
            return Err(SecretsError::invalid_argument(format!(
                "secret name '{}' has an invalid id",
                name
            )));
        }

        Ok(Self { full: name.to_string(), split })
    }

    /// Build `<parent>/secrets/<id>`.
    pub fn from_parts(parent: &str, id: &str) -> Result<Self> {
        Self::parse(&format!("{}{}{}", parent, SECRETS_SEGMENT, id))
    }

    pub fn scope(&self) -> &str {
        &self.full[..self.split]
    }

    pub fn id(&self) -> &str {
        &self.full[self.split + SECRETS_SEGMENT.len()..]
    }

    pub fn as_str(&self) -> &str {
        &self.full
    }

    /// Name of the version with the given ordinal.
    pub fn version(&self, ordinal: u64) -> String {
        format!("{}{}{}", self.full, VERSIONS_SEGMENT, ordinal)
    }

    /// Name of the `latest` alias for this secret.
    pub fn latest_version(&self) -> String {
        format!("{}{}{}", self.full, VERSIONS_SEGMENT, LATEST)
    }
}

impl fmt::Display for SecretName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}

/// Reference to a specific version of a secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionRef {
    Ordinal(u64),
    Latest,
}

/// Parsed `<secret-name>/versions/<ordinal|latest>` resource name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionName {
    secret: SecretName,
    version: VersionRef,
}

impl VersionName {
    pub fn parse(name: &str) -> Result<Self> {
        let split = name.rfind(VERSIONS_SEGMENT).ok_or_else(|| {
            SecretsError::invalid_argument(format!(
                "version name '{}' must look like <secret>/versions/<n>",
                name
            ))
        })?;
        let secret = SecretName::parse(&name[..split])?;
        let version = match &name[split + VERSIONS_SEGMENT.len()..] {
            LATEST => VersionRef::Latest,
            raw => match raw.parse::<u64>() {
                Ok(ordinal) if ordinal > 0 => VersionRef::Ordinal(ordinal),
                _ => {
                    return Err(SecretsError::invalid_argument(format!(
                        "version name '{}' has an invalid ordinal",
                        name
                    )))
                }
            },
        };
        Ok(Self { secret, version })
    }

    pub fn secret(&self) -> &SecretName {
        &self.secret
    }

    pub fn version(&self) -> VersionRef {
        self.version
    }

    /// Ordinal of a concrete version; `None` for the `latest` alias.
    pub fn ordinal(&self) -> Option<u64> {
        match self.version {
            VersionRef::Ordinal(n) => Some(n),
            VersionRef::Latest => None,
        }
    }
}

/// Order two version names of the same secret by recency.
///
/// Ordinals are compared numerically when both names parse, so `versions/10`
/// sorts after `versions/9`. Unparseable names fall back to string order.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let ordinals = VersionName::parse(a)
        .ok()
        .and_then(|v| v.ordinal())
        .zip(VersionName::parse(b).ok().and_then(|v| v.ordinal()));
    match ordinals {
        Some((x, y)) => x.cmp(&y),
        None => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::error::ErrorCode;

    #[test]
    fn test_parse_secret_name() {
        let name = SecretName::parse("projects/demo/secrets/api-key").unwrap();
        assert_eq!(name.scope(), "projects/demo");
        assert_eq!(name.id(), "api-key");
        assert_eq!(name.version(3), "projects/demo/secrets/api-key/versions/3");
        assert_eq!(name.latest_version(), "projects/demo/secrets/api-key/versions/latest");
    }

    #[test]
    fn test_from_parts() {
        let name = SecretName::from_parts("projects/demo", "db-password").unwrap();
        assert_eq!(name.as_str(), "projects/demo/secrets/db-password");
    }

    #[test]
    fn test_rejects_malformed_secret_names() {
        for bad in ["api-key", "/secrets/x", "projects/demo/secrets/", "projects/d/secrets/a/b"] {
            let err = SecretName::parse(bad).unwrap_err();
            assert_eq!(err.code(), ErrorCode::InvalidArgument, "{}", bad);
        }
    }

    #[test]
    fn test_parse_version_name() {
        let v = VersionName::parse("projects/demo/secrets/api-key/versions/7").unwrap();
        assert_eq!(v.ordinal(), Some(7));
        assert_eq!(v.secret().id(), "api-key");

        let latest = VersionName::parse("projects/demo/secrets/api-key/versions/latest").unwrap();
        assert_eq!(latest.version(), VersionRef::Latest);
        assert_eq!(latest.ordinal(), None);

        assert!(VersionName::parse("projects/demo/secrets/api-key/versions/0").is_err());
        assert!(VersionName::parse("projects/demo/secrets/api-key/versions/x").is_err());
    }

    #[test]
    fn test_compare_versions_numeric() {
        let nine = "projects/p/secrets/s/versions/9";
        let ten = "projects/p/secrets/s/versions/10";
        assert_eq!(compare_versions(ten, nine), Ordering::Greater);
        assert_eq!(compare_versions(nine, nine), Ordering::Equal);
        assert_eq!(compare_versions("b", "a"), Ordering::Greater);
    }
}
