//! Host capability interfaces for tally
//!
//! This crate defines the boundary between the tracking core and the
//! platform. It contains no platform code itself: the core only ever sees
//! point-in-time process snapshots and installed-software records.

mod mock;
mod records;
mod traits;

pub use mock::*;
pub use records::*;
pub use traits::*;
