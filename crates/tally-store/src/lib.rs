//! Persistence layer for tally
//!
//! Provides:
//! - Usage aggregation (seconds per user/machine/program, additive upsert)
//! - Installed program records (last write wins)
//! - Audit log (append-only)
//! - Spill log for usage deltas the store could not accept

mod audit;
mod records;
mod spill;
mod sqlite;
mod traits;

pub use audit::*;
pub use records::*;
pub use spill::*;
pub use sqlite::*;
pub use traits::*;

use thiserror::Error;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid usage delta {0}: must be finite and non-negative")]
    InvalidDelta(f64),

    #[error("Store lock poisoned")]
    LockPoisoned,
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
