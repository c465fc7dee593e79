//! # Configuration Management
//!
//! Settings for the lock, the cache, the GCP store and logging, loaded from
//! `SECRETLOCK__*` environment variables and validated on load.

pub mod settings;

pub use settings::{CacheSettings, GcpSettings, LockSettings, LoggingSettings, Settings};
