//! Error types for tally

use thiserror::Error;

/// Errors from the background tracking task
#[derive(Debug, Error)]
pub enum TallyError {
    #[error("Tracking tick failed: {0}")]
    TickFailed(String),

    #[error("Tracker stopped unexpectedly: {0}")]
    TrackerFailed(String),
}

impl TallyError {
    pub fn tick(msg: impl Into<String>) -> Self {
        Self::TickFailed(msg.into())
    }

    pub fn tracker(msg: impl Into<String>) -> Self {
        Self::TrackerFailed(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, TallyError>;
