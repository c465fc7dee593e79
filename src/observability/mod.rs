//! # Observability
//!
//! Structured logging setup and the counters recorded by the lock and cache
//! layers. Exporter installation is left to the embedding application; without
//! a `metrics` recorder every counter is a no-op.

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::describe_metrics;
