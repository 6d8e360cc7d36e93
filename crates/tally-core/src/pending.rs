//! Retry queue for usage writes the sink rejected

use chrono::{DateTime, Local};
use std::collections::VecDeque;
use tally_store::{SpilledUsage, UsageKey};

/// A usage delta that has not reached the sink yet
#[derive(Debug, Clone, PartialEq)]
pub struct PendingWrite {
    pub key: UsageKey,
    pub delta_seconds: f64,
    pub closed_at: DateTime<Local>,

    /// Attempts made so far, including the first
    pub attempts: u32,

    /// Tick of the most recent attempt
    pub last_attempt_tick: u64,

    pub last_error: String,
}

impl PendingWrite {
    pub fn to_spilled(&self) -> SpilledUsage {
        SpilledUsage {
            key: self.key.clone(),
            delta_seconds: self.delta_seconds,
            closed_at: self.closed_at,
        }
    }
}

/// Bounded FIFO of pending writes
#[derive(Debug)]
pub struct RetryQueue {
    writes: VecDeque<PendingWrite>,
    capacity: usize,
}

impl RetryQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            writes: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Queue a write. When full, the oldest write is evicted and returned.
    pub fn push(&mut self, write: PendingWrite) -> Option<PendingWrite> {
        let evicted = if self.writes.len() >= self.capacity {
            self.writes.pop_front()
        } else {
            None
        };
        self.writes.push_back(write);
        evicted
    }

    /// Remove and return every queued write, oldest first
    pub fn drain(&mut self) -> Vec<PendingWrite> {
        self.writes.drain(..).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingWrite> {
        self.writes.iter()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}
