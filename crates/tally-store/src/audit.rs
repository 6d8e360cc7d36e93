//! Audit event types

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tally_util::{MachineName, ProcessId, ProgramName, UserName};

/// Types of audit events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEventType {
    /// Agent started tracking
    AgentStarted {
        user: UserName,
        machine: MachineName,
        poll_interval_secs: u64,
    },

    /// Agent stopped
    AgentStopped {
        open_sessions: usize,
        spilled_writes: usize,
    },

    /// Installed software imported
    InventoryImported {
        program_count: usize,
        failed_sources: Vec<String>,
        failed_writes: usize,
    },

    /// Spill log replayed at startup
    SpillReplayed {
        replayed: usize,
        remaining: usize,
        orphaned: usize,
    },

    /// A session ended before it started; its duration was clamped to zero
    ClockSkewClamped {
        pid: ProcessId,
        program: ProgramName,
        skew_seconds: f64,
    },

    /// A usage delta could not be written after every retry
    UsageWriteAbandoned {
        program: ProgramName,
        delta_seconds: f64,
        attempts: u32,
    },
}

/// Full audit event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID
    pub id: i64,

    /// Event timestamp
    pub timestamp: DateTime<Local>,

    /// Event type and details
    pub event: AuditEventType,
}

impl AuditEvent {
    pub fn new(event: AuditEventType) -> Self {
        Self {
            id: 0, // Will be set by store
            timestamp: tally_util::now(),
            event,
        }
    }
}
