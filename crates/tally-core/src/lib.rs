//! Session tracking engine for tally
//!
//! This crate is the heart of tally, containing:
//! - The session store (open sessions keyed by pid)
//! - Per-tick reconciliation of process snapshots against open sessions
//! - Usage accounting into the aggregation sink, with a retry queue
//! - The one-shot installed-software import
//! - The cancellable tracker task that drives ticks

mod engine;
mod events;
mod importer;
mod pending;
mod session;
mod tracker;

pub use engine::*;
pub use events::*;
pub use importer::*;
pub use pending::*;
pub use session::*;
pub use tracker::*;
