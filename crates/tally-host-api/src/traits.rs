//! Host capability traits

use thiserror::Error;
use tracing::warn;

use crate::{InstalledProgram, InventoryReport, InventorySource, ProcessSample, SourceFailure};

/// Errors from host capabilities
#[derive(Debug, Error)]
pub enum HostError {
    #[error("Process snapshot unavailable: {0}")]
    SnapshotUnavailable(String),

    #[error("Inventory source '{source_name}' unavailable: {message}")]
    SourceUnavailable {
        source_name: String,
        message: String,
    },
}

impl HostError {
    pub fn source_unavailable(source: &InventorySource, message: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            source_name: source.name.clone(),
            message: message.into(),
        }
    }
}

pub type HostResult<T> = Result<T, HostError>;

/// Point-in-time enumeration of live processes.
///
/// Implementations may keep state between calls (hence `&mut self`), but each
/// call must reflect the processes alive at the moment it runs.
pub trait SnapshotSource: Send {
    /// List every live process. May fail transiently.
    fn list_processes(&mut self) -> HostResult<Vec<ProcessSample>>;
}

/// Installed-software enumeration split into independent sources
pub trait SoftwareInventory: Send + Sync {
    /// Sources this inventory reads, in the order they are enumerated
    fn sources(&self) -> Vec<InventorySource>;

    /// Read a single source
    fn list_source(&self, source: &InventorySource) -> HostResult<Vec<InstalledProgram>>;

    /// Read every source. A failing source is recorded and skipped; it never
    /// prevents the remaining sources from being read.
    fn list_installed(&self) -> InventoryReport {
        let mut report = InventoryReport::default();

        for source in self.sources() {
            match self.list_source(&source) {
                Ok(programs) => {
                    report.sources_read += 1;
                    report.programs.extend(programs);
                }
                Err(error) => {
                    warn!(source = %source.name, error = %error, "Skipping inventory source");
                    report.failures.push(SourceFailure { source, error });
                }
            }
        }

        report
    }
}
