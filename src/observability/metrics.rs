//! # Metrics
//!
//! Counters for lock acquisition, rotation and cache lookups, recorded through
//! the `metrics` facade.

use metrics::{counter, describe_counter, Unit};

use crate::secrets::{ErrorCode, Result, SecretsError};

pub const LOCK_ACQUISITIONS: &str = "secretlock_lock_acquisitions_total";
pub const ROTATIONS: &str = "secretlock_rotations_total";
pub const CACHE_LOOKUPS: &str = "secretlock_cache_lookups_total";
pub const CACHE_REFRESH_FAILURES: &str = "secretlock_cache_refresh_failures_total";

/// Outcome of a lock or rotation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// Lock held by another party within its grace period.
    Contended,
    /// Lost the etag race.
    Conflict,
    Error,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Contended => "contended",
            Self::Conflict => "conflict",
            Self::Error => "error",
        }
    }

    pub fn of<T>(result: &Result<T>) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(err) => Self::of_error(err),
        }
    }

    pub fn of_error(err: &SecretsError) -> Self {
        match err.code() {
            ErrorCode::ConcurrentModification => Self::Contended,
            ErrorCode::PreconditionFailed => Self::Conflict,
            _ => Self::Error,
        }
    }
}

/// How a cache lookup was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Hit,
    Miss,
    Stale,
}

impl Lookup {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Stale => "stale",
        }
    }
}

/// Register descriptions so exporters show the counters before the first event.
pub fn describe_metrics() {
    describe_counter!(LOCK_ACQUISITIONS, Unit::Count, "Lock acquisition attempts by outcome");
    describe_counter!(ROTATIONS, Unit::Count, "Secret rotations by outcome");
    describe_counter!(CACHE_LOOKUPS, Unit::Count, "Secrets cache lookups by result");
    describe_counter!(
        CACHE_REFRESH_FAILURES,
        Unit::Count,
        "Cache refreshes that failed and kept the previous value"
    );
}

pub fn record_lock_acquisition(outcome: Outcome) {
    counter!(LOCK_ACQUISITIONS, "outcome" => outcome.as_str()).increment(1);
}

pub fn record_rotation(outcome: Outcome) {
    counter!(ROTATIONS, "outcome" => outcome.as_str()).increment(1);
}

pub fn record_cache_lookup(result: Lookup) {
    counter!(CACHE_LOOKUPS, "result" => result.as_str()).increment(1);
}

pub fn record_cache_refresh_failure() {
    counter!(CACHE_REFRESH_FAILURES).increment(1);
}
