//! Trace time for observer-driven decoders.
//!
//! [`Clock`] holds the time a decoder reconstructed from timing packets.
//! [`ObservedClock`] pairs it with an observer collection so every time change
//! reaches the tick observers. [`TimeTracker`] is such an observer: it takes a
//! sample once per period.

mod clock;
mod error;
mod tracker;

pub use clock::{Clock, ObservedClock};
pub use error::{TimeError, TimeResult};
pub use tracker::{TimeSample, TimeTracker, TimeTrackerConfig};
