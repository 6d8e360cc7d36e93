//! Installed-software inventory for Linux hosts

mod desktop;
mod dpkg;

pub use desktop::parse_desktop_entry;
pub use dpkg::parse_dpkg_status;

use std::path::{Path, PathBuf};

use tally_host_api::{HostError, HostResult, InstalledProgram, InventorySource, SoftwareInventory};
use tally_util::expand_home;

#[derive(Debug, Clone)]
enum SourceKind {
    DpkgStatus(PathBuf),
    DesktopEntries(PathBuf),
}

/// Inventory built from a dpkg status file and any number of desktop-entry
/// directories. Every path is its own source.
#[derive(Debug, Clone, Default)]
pub struct LinuxInventory {
    sources: Vec<(InventorySource, SourceKind)>,
}

impl LinuxInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dpkg_status(mut self, path: impl AsRef<Path>) -> Self {
        let path = expand_home(path.as_ref());
        let source = InventorySource::new(format!("dpkg:{}", path.display()));
        self.sources.push((source, SourceKind::DpkgStatus(path)));
        self
    }

    pub fn with_desktop_dir(mut self, dir: impl AsRef<Path>) -> Self {
        let dir = expand_home(dir.as_ref());
        let source = InventorySource::new(format!("desktop:{}", dir.display()));
        self.sources.push((source, SourceKind::DesktopEntries(dir)));
        self
    }

    fn kind_of(&self, source: &InventorySource) -> Option<&SourceKind> {
        self.sources
            .iter()
            .find(|(s, _)| s == source)
            .map(|(_, kind)| kind)
    }
}

impl SoftwareInventory for LinuxInventory {
    fn sources(&self) -> Vec<InventorySource> {
        self.sources.iter().map(|(s, _)| s.clone()).collect()
    }

    fn list_source(&self, source: &InventorySource) -> HostResult<Vec<InstalledProgram>> {
        match self.kind_of(source) {
            Some(SourceKind::DpkgStatus(path)) => {
                let content = std::fs::read_to_string(path)
                    .map_err(|e| HostError::source_unavailable(source, e.to_string()))?;
                Ok(parse_dpkg_status(&content))
            }
            Some(SourceKind::DesktopEntries(dir)) => desktop::read_desktop_dir(source, dir),
            None => Err(HostError::source_unavailable(source, "not configured")),
        }
    }
}
