//! # Structured Logging
//!
//! Installs a `tracing-subscriber` fmt subscriber and provides span macros for
//! secret operations.

use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingSettings;

/// Create a tracing span for an operation on one secret.
///
/// ```rust,ignore
/// let span = secret_span!("rotate", "projects/p/secrets/db-password");
/// let span = secret_span!("refresh", name, policy = "mint");
/// ```
#[macro_export]
macro_rules! secret_span {
    ($operation:expr, $secret:expr) => {
        tracing::info_span!(
            "secret_operation",
            operation = %$operation,
            secret = %$secret,
            operation_id = %uuid::Uuid::new_v4()
        )
    };
    ($operation:expr, $secret:expr, $($field:tt)*) => {
        tracing::info_span!(
            "secret_operation",
            operation = %$operation,
            secret = %$secret,
            operation_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the configured level when set. A subscriber that is
/// already installed (e.g. by a test harness) is left in place.
pub fn init_logging(settings: &LoggingSettings) {
    let filter = env_filter(settings);

    let result = if settings.json {
        tracing::subscriber::set_global_default(
            fmt().json().with_env_filter(filter).with_current_span(true).finish(),
        )
    } else {
        tracing::subscriber::set_global_default(fmt().with_env_filter(filter).finish())
    };

    if result.is_err() {
        // Subscriber already set elsewhere; ignore.
        return;
    }

    tracing::debug!(level = %settings.level, json = settings.json, "logging initialized");
}

/// `RUST_LOG` if set and valid, otherwise the configured level.
fn env_filter(settings: &LoggingSettings) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level))
}
