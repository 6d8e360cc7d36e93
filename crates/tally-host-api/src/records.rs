//! Records produced by host capabilities

use chrono::{DateTime, Local};
use tally_util::{ProcessId, ProgramName};

use crate::HostError;

/// One live process as seen by a snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessSample {
    pub pid: ProcessId,
    pub name: ProgramName,
    /// When the OS says the process started
    pub create_time: DateTime<Local>,
}

impl ProcessSample {
    pub fn new(pid: u32, name: impl Into<ProgramName>, create_time: DateTime<Local>) -> Self {
        Self {
            pid: ProcessId::new(pid),
            name: name.into(),
            create_time,
        }
    }
}

/// Installed software as reported by one inventory source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledProgram {
    pub name: ProgramName,
    pub version: Option<String>,
    pub publisher: Option<String>,
    pub install_location: Option<String>,
}

impl InstalledProgram {
    pub fn named(name: impl Into<ProgramName>) -> Self {
        Self {
            name: name.into(),
            version: None,
            publisher: None,
            install_location: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_publisher(mut self, publisher: impl Into<String>) -> Self {
        self.publisher = Some(publisher.into());
        self
    }

    pub fn with_install_location(mut self, location: impl Into<String>) -> Self {
        self.install_location = Some(location.into());
        self
    }
}

/// A named place software records are read from (a package database, a directory)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InventorySource {
    pub name: String,
}

impl InventorySource {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// A source that could not be enumerated
#[derive(Debug)]
pub struct SourceFailure {
    pub source: InventorySource,
    pub error: HostError,
}

/// Result of enumerating every source of an inventory
#[derive(Debug, Default)]
pub struct InventoryReport {
    /// Records in source order
    pub programs: Vec<InstalledProgram>,
    pub failures: Vec<SourceFailure>,
    pub sources_read: usize,
}
