//! Mock host capabilities for testing

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::{
    HostError, HostResult, InstalledProgram, InventorySource, ProcessSample, SnapshotSource,
    SoftwareInventory,
};

#[derive(Debug, Clone)]
enum ScriptedSnapshot {
    Processes(Vec<ProcessSample>),
    Failure(String),
}

#[derive(Debug, Default)]
struct MockSnapshotState {
    script: VecDeque<ScriptedSnapshot>,
    live: Vec<ProcessSample>,
    calls: usize,
}

/// Scriptable snapshot source.
///
/// Queued snapshots are returned one per call; once the queue is empty the
/// "live" process list is returned on every call. Clones share state, so a
/// test can keep a handle after moving one into the engine.
#[derive(Debug, Clone, Default)]
pub struct MockSnapshotSource {
    state: Arc<Mutex<MockSnapshotState>>,
}

impl MockSnapshotSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a snapshot for a future call
    pub fn push_snapshot(&self, processes: Vec<ProcessSample>) {
        self.state
            .lock()
            .unwrap()
            .script
            .push_back(ScriptedSnapshot::Processes(processes));
    }

    /// Queue a transient failure for a future call
    pub fn push_failure(&self, message: impl Into<String>) {
        self.state
            .lock()
            .unwrap()
            .script
            .push_back(ScriptedSnapshot::Failure(message.into()));
    }

    /// Replace the process list returned once the script runs out
    pub fn set_live(&self, processes: Vec<ProcessSample>) {
        self.state.lock().unwrap().live = processes;
    }

    /// Number of times the engine asked for a snapshot
    pub fn calls(&self) -> usize {
        self.state.lock().unwrap().calls
    }
}

impl SnapshotSource for MockSnapshotSource {
    fn list_processes(&mut self) -> HostResult<Vec<ProcessSample>> {
        let mut state = self.state.lock().unwrap();
        state.calls += 1;

        match state.script.pop_front() {
            Some(ScriptedSnapshot::Processes(processes)) => Ok(processes),
            Some(ScriptedSnapshot::Failure(message)) => Err(HostError::SnapshotUnavailable(message)),
            None => Ok(state.live.clone()),
        }
    }
}

/// Inventory with canned per-source results
#[derive(Debug, Default)]
pub struct MockInventory {
    order: Vec<InventorySource>,
    results: HashMap<InventorySource, Result<Vec<InstalledProgram>, String>>,
}

impl MockInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a source that yields `programs`
    pub fn with_source(mut self, name: &str, programs: Vec<InstalledProgram>) -> Self {
        let source = InventorySource::new(name);
        self.order.push(source.clone());
        self.results.insert(source, Ok(programs));
        self
    }

    /// Add a source that fails to enumerate
    pub fn with_failing_source(mut self, name: &str, message: &str) -> Self {
        let source = InventorySource::new(name);
        self.order.push(source.clone());
        self.results.insert(source, Err(message.to_string()));
        self
    }
}

impl SoftwareInventory for MockInventory {
    fn sources(&self) -> Vec<InventorySource> {
        self.order.clone()
    }

    fn list_source(&self, source: &InventorySource) -> HostResult<Vec<InstalledProgram>> {
        match self.results.get(source) {
            Some(Ok(programs)) => Ok(programs.clone()),
            Some(Err(message)) => Err(HostError::source_unavailable(source, message.clone())),
            None => Err(HostError::source_unavailable(source, "unknown source")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;

    #[test]
    fn script_then_live() {
        let mut source = MockSnapshotSource::new();
        let now = Local::now();

        source.push_snapshot(vec![ProcessSample::new(1, "init", now)]);
        source.push_failure("proc unreadable");
        source.set_live(vec![]);

        assert_eq!(source.list_processes().unwrap().len(), 1);
        assert!(matches!(
            source.list_processes(),
            Err(HostError::SnapshotUnavailable(_))
        ));
        assert!(source.list_processes().unwrap().is_empty());
        assert_eq!(source.calls(), 3);
    }

    #[test]
    fn clones_share_script() {
        let handle = MockSnapshotSource::new();
        let mut engine_side = handle.clone();

        handle.push_snapshot(vec![ProcessSample::new(7, "editor", Local::now())]);
        assert_eq!(engine_side.list_processes().unwrap()[0].pid.as_u32(), 7);
        assert_eq!(handle.calls(), 1);
    }

    #[test]
    fn failing_source_does_not_stop_enumeration() {
        let inventory = MockInventory::new()
            .with_source("first", vec![InstalledProgram::named("vim")])
            .with_failing_source("broken", "missing")
            .with_source("last", vec![InstalledProgram::named("git")]);

        let report = inventory.list_installed();

        assert_eq!(report.sources_read, 2);
        assert_eq!(report.programs.len(), 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].source.name, "broken");
    }
}
