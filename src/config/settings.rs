//! # Configuration Settings
//!
//! Every section has defaults, so an empty environment yields a working
//! configuration. Nested keys use `__` as separator, e.g.
//! `SECRETLOCK__LOCK__GRACE_PERIOD_MS=30000`.
//!
//! A settings file (TOML, YAML or JSON, picked by extension) may provide a
//! base layer; environment variables override it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use validator::Validate;

use crate::secrets::backends::SECRET_MANAGER_ENDPOINT;
use crate::secrets::{Result, SecretString, SecretsError};

pub const ENV_PREFIX: &str = "SECRETLOCK";
const ENV_SEPARATOR: &str = "__";

/// Top-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
#[serde(default)]
pub struct Settings {
    #[validate(nested)]
    pub lock: LockSettings,

    #[validate(nested)]
    pub cache: CacheSettings,

    #[validate(nested)]
    pub gcp: GcpSettings,

    #[validate(nested)]
    pub logging: LoggingSettings,
}

impl Settings {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::load(config::Config::builder().add_source(environment()))
    }

    /// Load from an explicit variable map instead of the process environment.
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self> {
        Self::load(config::Config::builder().add_source(environment().source(Some(vars))))
    }

    /// Load `path`, then apply overrides from the process environment.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(SecretsError::config_error(format!(
                "settings file not found: {}",
                path.display()
            )));
        }
        Self::load(
            config::Config::builder()
                .add_source(config::File::from(path))
                .add_source(environment()),
        )
    }

    fn load(builder: config::ConfigBuilder<config::builder::DefaultState>) -> Result<Self> {
        let settings: Settings = builder
            .build()
            .and_then(config::Config::try_deserialize)
            .map_err(|e| SecretsError::config_error(format!("failed to load settings: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Run field validation.
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self)
            .map_err(|e| SecretsError::config_error(format!("invalid settings: {}", e)))
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_SEPARATOR)
        .separator(ENV_SEPARATOR)
        .try_parsing(true)
}

/// Lock controller settings.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LockSettings {
    /// How long a `locked_at` annotation is honored, in milliseconds
    #[validate(range(max = 86_400_000, message = "Grace period must not exceed 24 hours"))]
    pub grace_period_ms: u64,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self { grace_period_ms: 60_000 }
    }
}

impl LockSettings {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

/// Secrets cache settings.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CacheSettings {
    #[validate(range(min = 1, message = "Cache capacity must be at least 1"))]
    pub max_capacity: u64,

    #[validate(range(min = 1, message = "Default TTL must be at least 1 second"))]
    pub default_ttl_secs: u64,

    /// Serve expired entries while refreshing in the background
    pub allow_stale: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { max_capacity: 1000, default_ttl_secs: 300, allow_stale: false }
    }
}

impl CacheSettings {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

/// GCP Secret Manager settings.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct GcpSettings {
    #[validate(url(message = "Endpoint must be a valid URL"))]
    pub endpoint: String,

    /// OAuth bearer token
    pub access_token: Option<SecretString>,

    #[validate(range(min = 1, max = 300, message = "Timeout must be between 1 and 300 seconds"))]
    pub timeout_secs: u64,
}

impl Default for GcpSettings {
    fn default() -> Self {
        Self { endpoint: SECRET_MANAGER_ENDPOINT.to_string(), access_token: None, timeout_secs: 15 }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LoggingSettings {
    /// Filter directive used when `RUST_LOG` is unset
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self { level: "info".to_string(), json: false }
    }
}
