//! Shared utilities: fixed-point scales and the engine clock.

pub mod clock;
pub mod fixed;

pub use clock::{Clock, ManualClock, SystemClock};
pub use fixed::{Bps, FixedPointError, Pct100};
