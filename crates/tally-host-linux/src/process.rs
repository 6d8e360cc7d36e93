//! Process snapshots backed by `sysinfo`

use std::collections::HashSet;

use sysinfo::{Pid, ProcessRefreshKind, System};
use tally_host_api::{HostError, HostResult, ProcessSample, SnapshotSource};
use tally_util::ProgramName;
use tracing::debug;

/// Name recorded for processes the OS reports without one
pub const UNKNOWN_PROGRAM: &str = "unknown";

/// Snapshot source reading the live process table.
///
/// The `System` is kept between calls so each refresh only has to diff the
/// process table instead of rebuilding it.
pub struct SysinfoSnapshotSource {
    system: System,
}

impl SysinfoSnapshotSource {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for SysinfoSnapshotSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotSource for SysinfoSnapshotSource {
    fn list_processes(&mut self) -> HostResult<Vec<ProcessSample>> {
        let captured_at = tally_util::now();
        self.system
            .refresh_processes_specifics(ProcessRefreshKind::new());

        let processes = self.system.processes();
        if processes.is_empty() {
            // At the very least our own process must be visible
            return Err(HostError::SnapshotUnavailable(
                "process table is empty".into(),
            ));
        }

        // On Linux, threads show up next to their owning process
        let threads: HashSet<Pid> = processes
            .iter()
            .filter_map(|(pid, process)| {
                process
                    .tasks()
                    .map(|tasks| tasks.iter().filter(|t| *t != pid).copied().collect::<Vec<_>>())
            })
            .flatten()
            .collect();

        let samples: Vec<ProcessSample> = processes
            .iter()
            .filter(|(pid, _)| !threads.contains(*pid))
            .map(|(pid, process)| {
                let name = match process.name() {
                    "" => ProgramName::new(UNKNOWN_PROGRAM),
                    name => ProgramName::new(name),
                };
                let create_time =
                    tally_util::from_unix_seconds(process.start_time()).unwrap_or(captured_at);

                ProcessSample {
                    pid: pid.as_u32().into(),
                    name,
                    create_time,
                }
            })
            .collect();

        debug!(
            processes = samples.len(),
            threads_skipped = threads.len(),
            "Process snapshot captured"
        );

        Ok(samples)
    }
}
