//! One-shot installed-software import

use chrono::{DateTime, Local};
use tally_host_api::SoftwareInventory;
use tally_store::{InstalledProgramRecord, InventorySink};
use tally_util::UserName;
use tracing::{info, warn};

/// Outcome of one inventory import
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    /// Sources enumerated successfully
    pub sources_read: usize,

    /// Names of sources that could not be enumerated
    pub failed_sources: Vec<String>,

    /// Programs found across all readable sources
    pub programs_found: usize,

    /// Records written to the sink
    pub written: usize,

    /// Records the sink rejected
    pub failed_writes: usize,
}

/// Enumerate installed software and upsert one record per program for `user`.
///
/// Never fails as a whole: unreadable sources and rejected records are
/// logged, counted and skipped. Later records overwrite earlier ones with the
/// same name.
pub fn import_inventory(
    inventory: &dyn SoftwareInventory,
    sink: &dyn InventorySink,
    user: &UserName,
    now: DateTime<Local>,
) -> ImportSummary {
    let report = inventory.list_installed();
    let mut summary = ImportSummary {
        sources_read: report.sources_read,
        failed_sources: report
            .failures
            .iter()
            .map(|f| f.source.name.clone())
            .collect(),
        programs_found: report.programs.len(),
        ..Default::default()
    };

    for program in report.programs {
        let record = InstalledProgramRecord {
            user: user.clone(),
            program_name: program.name,
            version: program.version,
            publisher: program.publisher,
            install_location: program.install_location,
            last_checked: now,
        };

        match sink.upsert_installed_program(&record) {
            Ok(()) => summary.written += 1,
            Err(e) => {
                warn!(program = %record.program_name, error = %e, "Failed to record installed program");
                summary.failed_writes += 1;
            }
        }
    }

    info!(
        sources_read = summary.sources_read,
        failed_sources = summary.failed_sources.len(),
        programs = summary.programs_found,
        written = summary.written,
        failed_writes = summary.failed_writes,
        "Inventory import complete"
    );

    summary
}
