//! Store trait definitions

use chrono::{DateTime, Local};
use tally_util::{MachineName, ProgramName, UserName};

use crate::{AuditEvent, InstalledProgramRecord, StoreResult, UsageKey, UsageSummary};

/// Accumulator of usage seconds per (user, machine, program).
///
/// Implementations must apply each call as a single atomic read-modify-write
/// and admit at most one writer per key at a time, so concurrent callers can
/// never lose an update.
pub trait UsageSink: Send + Sync {
    /// Add `delta_seconds` to the total for `key`, creating the row with
    /// `total = delta_seconds` if it does not exist yet, and stamp
    /// `last_updated = at`. Returns the new total.
    fn upsert_usage(&self, key: &UsageKey, delta_seconds: f64, at: DateTime<Local>)
    -> StoreResult<f64>;
}

/// Destination for installed-software records
pub trait InventorySink: Send + Sync {
    /// Insert or overwrite the record for (user, program_name)
    fn upsert_installed_program(&self, record: &InstalledProgramRecord) -> StoreResult<()>;
}

/// Main store trait
pub trait Store: UsageSink + InventorySink {
    // Audit log

    /// Append an audit event
    fn append_audit(&self, event: AuditEvent) -> StoreResult<()>;

    /// Get recent audit events, newest first
    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>>;

    // Usage

    /// Get the aggregate for a key
    fn get_usage(&self, key: &UsageKey) -> StoreResult<Option<UsageSummary>>;

    /// All aggregates for a user on a machine, largest total first
    fn list_usage(&self, user: &UserName, machine: &MachineName) -> StoreResult<Vec<UsageSummary>>;

    // Inventory

    /// Get the installed program record for a user
    fn get_installed_program(
        &self,
        user: &UserName,
        program: &ProgramName,
    ) -> StoreResult<Option<InstalledProgramRecord>>;

    /// All installed programs recorded for a user, by name
    fn list_installed_programs(&self, user: &UserName) -> StoreResult<Vec<InstalledProgramRecord>>;

    // Health

    /// Check if store is healthy
    fn is_healthy(&self) -> bool;
}

pub(crate) fn check_delta(delta_seconds: f64) -> StoreResult<()> {
    if delta_seconds.is_finite() && delta_seconds >= 0.0 {
        Ok(())
    } else {
        Err(crate::StoreError::InvalidDelta(delta_seconds))
    }
}
