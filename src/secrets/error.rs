//! Error types for secret coordination operations.
//!
//! Every failure carries a machine-checkable [`ErrorCode`] so callers can pick
//! a retry policy without matching on message text. Errors are `Clone` because
//! a single settled result is handed to every waiter of a de-duplicated fetch.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result type for secret coordination operations.
pub type Result<T> = std::result::Result<T, SecretsError>;

/// Boxed error returned by caller-supplied producers.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Machine-checkable classification of a [`SecretsError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotFound,
    AlreadyExists,
    InvalidArgument,
    PreconditionFailed,
    ConcurrentModification,
    InvalidProducerResult,
    ProducerFailed,
    Unavailable,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::AlreadyExists => "already_exists",
            Self::InvalidArgument => "invalid_argument",
            Self::PreconditionFailed => "precondition_failed",
            Self::ConcurrentModification => "concurrent_modification",
            Self::InvalidProducerResult => "invalid_producer_result",
            Self::ProducerFailed => "producer_failed",
            Self::Unavailable => "unavailable",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur while coordinating or caching secrets.
#[derive(Error, Debug, Clone)]
pub enum SecretsError {
    /// Secret or version does not exist in the store.
    #[error("Secret not found: {resource}")]
    NotFound { resource: String },

    /// A secret with this name already exists.
    #[error("Secret already exists: {resource}")]
    AlreadyExists { resource: String },

    /// Malformed request (bad resource name, unparseable payload, ...).
    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// Conditioned write rejected because the version tag no longer matches.
    #[error("Precondition failed for '{resource}': {reason}")]
    PreconditionFailed { resource: String, reason: String },

    /// Lock is actively held by another party within its grace period.
    #[error("Secret '{resource}' is locked since {locked_at}")]
    ConcurrentModification { resource: String, locked_at: DateTime<Utc> },

    /// Producer returned a payload the store cannot hold.
    #[error("Invalid producer result: {reason}")]
    InvalidProducerResult { reason: String },

    /// Caller-supplied producer failed.
    #[error("Secret producer failed: {source}")]
    Producer {
        #[source]
        source: Arc<dyn StdError + Send + Sync + 'static>,
    },

    /// Failed to reach the secret store.
    #[error("Backend connection failed: {message}")]
    ConnectionFailed { message: String },

    /// Authentication with the secret store failed.
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// Store-specific error with no better classification.
    #[error("Backend error: {message}")]
    Backend { message: String },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(Arc<serde_json::Error>),
}

impl From<serde_json::Error> for SecretsError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(Arc::new(err))
    }
}

impl SecretsError {
    /// Create a not found error.
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound { resource: resource.into() }
    }

    /// Create an already exists error.
    pub fn already_exists(resource: impl Into<String>) -> Self {
        Self::AlreadyExists { resource: resource.into() }
    }

    /// Create an invalid argument error.
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument { reason: reason.into() }
    }

    /// Create a precondition failed error.
    pub fn precondition_failed(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PreconditionFailed { resource: resource.into(), reason: reason.into() }
    }

    /// Create a concurrent modification error.
    pub fn concurrent_modification(resource: impl Into<String>, locked_at: DateTime<Utc>) -> Self {
        Self::ConcurrentModification { resource: resource.into(), locked_at }
    }

    /// Create an invalid producer result error.
    pub fn invalid_producer_result(reason: impl Into<String>) -> Self {
        Self::InvalidProducerResult { reason: reason.into() }
    }

    /// Wrap a producer failure.
    pub fn producer(source: impl Into<BoxError>) -> Self {
        Self::Producer { source: Arc::from(source.into()) }
    }

    /// Create a connection failed error.
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed { message: message.into() }
    }

    /// Create an authentication failed error.
    pub fn authentication_failed(message: impl Into<String>) -> Self {
        Self::AuthenticationFailed { message: message.into() }
    }

    /// Create a backend error.
    pub fn backend_error(message: impl Into<String>) -> Self {
        Self::Backend { message: message.into() }
    }

    /// Create a config error.
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    /// Classification of this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::AlreadyExists { .. } => ErrorCode::AlreadyExists,
            Self::InvalidArgument { .. } => ErrorCode::InvalidArgument,
            Self::PreconditionFailed { .. } => ErrorCode::PreconditionFailed,
            Self::ConcurrentModification { .. } => ErrorCode::ConcurrentModification,
            Self::InvalidProducerResult { .. } => ErrorCode::InvalidProducerResult,
            Self::Producer { .. } => ErrorCode::ProducerFailed,
            Self::ConnectionFailed { .. } => ErrorCode::Unavailable,
            Self::AuthenticationFailed { .. }
            | Self::Backend { .. }
            | Self::Config { .. }
            | Self::Serialization(_) => ErrorCode::Internal,
        }
    }

    /// Whether re-running the whole read-modify-write cycle may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.code(),
            ErrorCode::PreconditionFailed
                | ErrorCode::ConcurrentModification
                | ErrorCode::Unavailable
        )
    }

    pub fn is_not_found(&self) -> bool {
        self.code() == ErrorCode::NotFound
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_constructors() {
        let err = SecretsError::not_found("projects/p/secrets/s");
        assert!(matches!(err, SecretsError::NotFound { .. }));
        assert_eq!(err.to_string(), "Secret not found: projects/p/secrets/s");
        assert!(err.is_not_found());

        let err = SecretsError::precondition_failed("projects/p/secrets/s", "etag mismatch");
        assert_eq!(err.code(), ErrorCode::PreconditionFailed);
        assert!(err.is_retryable());

        let err = SecretsError::invalid_producer_result("empty payload");
        assert_eq!(err.code(), ErrorCode::InvalidProducerResult);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_concurrent_modification_is_distinct() {
        let err = SecretsError::concurrent_modification("projects/p/secrets/s", Utc::now());
        assert_eq!(err.code(), ErrorCode::ConcurrentModification);
        assert_ne!(err.code(), ErrorCode::PreconditionFailed);
        assert!(err.to_string().contains("is locked since"));
    }

    #[test]
    fn test_producer_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "upstream down");
        let err = SecretsError::producer(io);
        assert_eq!(err.code(), ErrorCode::ProducerFailed);
        assert!(err.source().is_some());
        assert!(err.to_string().contains("upstream down"));

        let cloned = err.clone();
        assert_eq!(cloned.to_string(), err.to_string());
    }

    #[test]
    fn test_error_code_display() {
        assert_eq!(ErrorCode::NotFound.to_string(), "not_found");
        assert_eq!(ErrorCode::ConcurrentModification.as_str(), "concurrent_modification");
    }
}
