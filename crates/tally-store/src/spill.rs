//! Spill log for usage deltas the store could not accept
//!
//! One JSON object per line. Entries are appended when a write is abandoned
//! and replayed into the store on the next start.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::{StoreResult, UsageKey, UsageSink};

/// A usage delta waiting to be written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpilledUsage {
    #[serde(flatten)]
    pub key: UsageKey,
    pub delta_seconds: f64,
    pub closed_at: DateTime<Local>,
}

/// Outcome of replaying the spill log
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayOutcome {
    pub replayed: usize,
    pub remaining: usize,
    pub malformed: usize,

    /// Entries of an interrupted earlier replay set aside unapplied
    pub orphaned: usize,
}

/// Append-only JSON-lines file of pending usage deltas
#[derive(Debug, Clone)]
pub struct SpillLog {
    path: PathBuf,
}

impl SpillLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry
    pub fn append(&self, entry: &SpilledUsage) -> StoreResult<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, entry)?;
        writer.write_all(b"\n")?;
        writer.flush()?;

        debug!(key = %entry.key, delta_secs = entry.delta_seconds, "Usage spilled");
        Ok(())
    }

    /// Read every well-formed entry. A missing file reads as empty.
    pub fn read_all(&self) -> StoreResult<Vec<SpilledUsage>> {
        Ok(read_lines(&self.path)?.0)
    }

    /// File holding the entries of a replay in progress
    pub fn replaying_path(&self) -> PathBuf {
        self.path.with_extension("jsonl.replaying")
    }

    /// File holding entries from an interrupted replay, kept for manual
    /// reconciliation and never applied automatically
    pub fn orphaned_path(&self) -> PathBuf {
        self.path.with_extension("jsonl.orphaned")
    }

    /// Write every entry into `sink`.
    ///
    /// The log is moved aside before the first write, so an entry is applied
    /// at most once even if this call fails part way. Entries the sink
    /// rejects are appended to a fresh log. If a replay is interrupted, its
    /// aside file is moved to [`SpillLog::orphaned_path`] on the next call
    /// instead of being applied again.
    pub fn replay(&self, sink: &dyn UsageSink, now: DateTime<Local>) -> StoreResult<ReplayOutcome> {
        let replaying = self.replaying_path();
        let orphaned = self.orphan_interrupted(&replaying)?;

        match fs::rename(&self.path, &replaying) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ReplayOutcome {
                    orphaned,
                    ..Default::default()
                });
            }
            Err(e) => return Err(e.into()),
        }

        let (entries, malformed) = read_lines(&replaying)?;
        let mut replayed = 0;
        let mut remaining = 0;
        for entry in entries {
            match sink.upsert_usage(&entry.key, entry.delta_seconds, now) {
                Ok(_) => replayed += 1,
                Err(e) => {
                    warn!(
                        key = %entry.key,
                        delta_secs = entry.delta_seconds,
                        error = %e,
                        "Spilled usage still cannot be written"
                    );
                    // On failure the aside file stays and is orphaned next time
                    self.append(&entry)?;
                    remaining += 1;
                }
            }
        }

        fs::remove_file(&replaying)?;

        info!(replayed, remaining, malformed, orphaned, "Spill log replayed");

        Ok(ReplayOutcome {
            replayed,
            remaining,
            malformed,
            orphaned,
        })
    }

    /// Move a leftover aside file into the orphan file, returning how many
    /// entries it held
    fn orphan_interrupted(&self, replaying: &Path) -> StoreResult<usize> {
        if !replaying.exists() {
            return Ok(0);
        }
        let (entries, _) = read_lines(replaying)?;

        warn!(
            path = %replaying.display(),
            entries = entries.len(),
            orphaned_path = %self.orphaned_path().display(),
            "Previous spill replay was interrupted, keeping its entries for manual reconciliation"
        );

        let orphan_log = SpillLog::new(self.orphaned_path());
        for entry in &entries {
            orphan_log.append(entry)?;
        }
        fs::remove_file(replaying)?;
        Ok(entries.len())
    }
}

fn read_lines(path: &Path) -> StoreResult<(Vec<SpilledUsage>, usize)> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e.into()),
    };

    let mut entries = Vec::new();
    let mut malformed = 0;
    for (index, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<SpilledUsage>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                malformed += 1;
                warn!(
                    path = %path.display(),
                    line = index + 1,
                    error = %e,
                    "Dropping malformed spill entry"
                );
            }
        }
    }

    Ok((entries, malformed))
}
