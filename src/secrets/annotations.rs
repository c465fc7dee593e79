//! Typed view of the reserved lock annotations.
//!
//! The store only knows a string map. `locked_at` marks an active lock and
//! `updated_at` the last successful rotation; both are RFC 3339 timestamps with
//! millisecond precision. Everything else in the map is left untouched.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use std::collections::HashMap;

pub const LOCKED_AT: &str = "locked_at";
pub const UPDATED_AT: &str = "updated_at";

/// Reserved annotation values, parsed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockMarkers {
    /// Absent, or present but unparseable, means unlocked.
    pub locked_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl LockMarkers {
    pub fn read(annotations: &HashMap<String, String>) -> Self {
        Self {
            locked_at: annotations.get(LOCKED_AT).and_then(|raw| parse_timestamp(raw)),
            updated_at: annotations.get(UPDATED_AT).and_then(|raw| parse_timestamp(raw)),
        }
    }

    /// Write both markers into `annotations`, removing keys set to `None`.
    pub fn write_into(&self, annotations: &mut HashMap<String, String>) {
        write_marker(annotations, LOCKED_AT, self.locked_at);
        write_marker(annotations, UPDATED_AT, self.updated_at);
    }

    /// Whether a lock recorded here is still honored at `now`.
    pub fn is_locked(&self, grace_period: Duration, now: DateTime<Utc>) -> bool {
        self.locked_at.is_some_and(|locked_at| lock_is_active(locked_at, grace_period, now))
    }
}

/// A lock taken at `locked_at` is honored while `now <= locked_at + grace_period`.
pub fn lock_is_active(locked_at: DateTime<Utc>, grace_period: Duration, now: DateTime<Utc>) -> bool {
    now <= locked_at + grace_period
}

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw).ok().map(|ts| ts.with_timezone(&Utc))
}

/// Set a single marker, or remove it when `value` is `None`. Other keys,
/// including an unparseable value under the other marker, are left alone.
pub fn write_marker(annotations: &mut HashMap<String, String>, key: &str, value: Option<DateTime<Utc>>) {
    match value {
        Some(ts) => {
            annotations.insert(key.to_string(), format_timestamp(ts));
        }
        None => {
            annotations.remove(key);
        }
    }
}
