//! Utility building blocks shared by the lock and cache layers.

pub mod clock;
pub mod inflight;

pub use clock::{Clock, ManualClock, SystemClock};
pub use inflight::{InFlight, Pending};
