//! Shared utilities for tally
//!
//! This crate provides:
//! - ID types (ProcessId, ProgramName, UserName, MachineName)
//! - Wall-clock helpers (mock time, duration arithmetic)
//! - Error types
//! - Default paths for config and data directories

mod error;
mod ids;
mod paths;
mod time;

pub use error::*;
pub use ids::*;
pub use paths::*;
pub use time::*;
