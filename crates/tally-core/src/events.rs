//! Core events emitted by the engine

use chrono::{DateTime, Local};
use tally_store::UsageKey;
use tally_util::{ProcessId, ProgramName};

use crate::PendingWrite;

/// Events emitted by the tracking engine, in the order they happened
#[derive(Debug, Clone, PartialEq)]
pub enum CoreEvent {
    /// A pid was seen for the first time
    SessionOpened {
        pid: ProcessId,
        program: ProgramName,
        start_time: DateTime<Local>,
    },

    /// A tracked pid vanished and its duration was handed to the sink.
    /// `new_total` is `None` when the write failed.
    SessionClosed {
        pid: ProcessId,
        program: ProgramName,
        duration_seconds: f64,
        new_total: Option<f64>,
    },

    /// A session ended before it started; its duration was clamped to zero
    ClockSkewClamped {
        pid: ProcessId,
        program: ProgramName,
        skew_seconds: f64,
    },

    /// The snapshot source failed; the tick was skipped
    SnapshotFailed { error: String },

    /// The sink rejected a write; it has been queued for retry
    UsageWriteFailed {
        key: UsageKey,
        delta_seconds: f64,
        attempts: u32,
        error: String,
    },

    /// A queued write finally went through
    UsageRecovered {
        key: UsageKey,
        delta_seconds: f64,
        attempts: u32,
    },

    /// A write ran out of attempts or was evicted from a full queue
    UsageAbandoned { write: PendingWrite },
}
