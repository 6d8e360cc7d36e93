//! Open sessions and how they close

use chrono::{DateTime, Local};
use std::collections::{HashMap, HashSet};
use tally_util::{ProcessId, ProgramName};

/// One process's observed lifetime, from its create time until the first
/// snapshot that no longer contains it
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub program: ProgramName,

    /// Process create time as reported by the OS
    pub start_time: DateTime<Local>,
}

impl Session {
    pub fn new(program: ProgramName, start_time: DateTime<Local>) -> Self {
        Self {
            program,
            start_time,
        }
    }

    /// End the session at `now`.
    ///
    /// A negative elapsed time (the clock moved backwards, or the OS reported
    /// a create time in the future) is clamped to zero and reported as skew.
    pub fn close(self, pid: ProcessId, now: DateTime<Local>) -> ClosedSession {
        let elapsed = tally_util::seconds_between(self.start_time, now);
        let (duration_seconds, skew_seconds) = if elapsed < 0.0 {
            (0.0, Some(-elapsed))
        } else {
            (elapsed, None)
        };

        ClosedSession {
            pid,
            program: self.program,
            started_at: self.start_time,
            ended_at: now,
            duration_seconds,
            skew_seconds,
        }
    }
}

/// A session that has ended, ready to be accounted
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedSession {
    pub pid: ProcessId,
    pub program: ProgramName,
    pub started_at: DateTime<Local>,
    pub ended_at: DateTime<Local>,

    /// Never negative
    pub duration_seconds: f64,

    /// How far `ended_at` preceded `started_at`, when it did
    pub skew_seconds: Option<f64>,
}

/// Open sessions keyed by pid.
///
/// Owned by exactly one [`crate::TrackingEngine`] and only ever touched from
/// the context running its ticks, so it needs no locking. It is never
/// persisted: a restarted engine starts empty.
///
/// Sessions are keyed by pid alone. A pid that exits and is recycled by
/// another program between two snapshots is indistinguishable from the
/// original process, so the new process continues the old session under
/// the old program name.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: HashMap<ProcessId, Session>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, pid: ProcessId) -> bool {
        self.sessions.contains_key(&pid)
    }

    /// Track a new session, returning whatever was tracked under `pid` before
    pub fn insert(&mut self, pid: ProcessId, session: Session) -> Option<Session> {
        self.sessions.insert(pid, session)
    }

    pub fn remove(&mut self, pid: ProcessId) -> Option<Session> {
        self.sessions.remove(&pid)
    }

    pub fn current_keys(&self) -> HashSet<ProcessId> {
        self.sessions.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop every open session
    pub fn clear(&mut self) {
        self.sessions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap()
    }

    #[test]
    fn close_computes_elapsed_seconds() {
        let session = Session::new(ProgramName::new("app.exe"), t0());
        let closed = session.close(ProcessId::new(100), t0() + chrono::Duration::seconds(60));

        assert_eq!(closed.duration_seconds, 60.0);
        assert!(closed.skew_seconds.is_none());
        assert_eq!(closed.pid, ProcessId::new(100));
    }

    #[test]
    fn negative_elapsed_is_clamped() {
        let session = Session::new(ProgramName::new("app.exe"), t0());
        let closed = session.close(ProcessId::new(100), t0() - chrono::Duration::seconds(5));

        assert_eq!(closed.duration_seconds, 0.0);
        assert_eq!(closed.skew_seconds, Some(5.0));
    }

    #[test]
    fn store_operations() {
        let mut store = SessionStore::new();
        let pid = ProcessId::new(42);

        assert!(!store.contains(pid));
        assert!(store.insert(pid, Session::new("vim".into(), t0())).is_none());
        assert!(store.contains(pid));
        assert_eq!(store.current_keys(), HashSet::from([pid]));

        let removed = store.remove(pid).unwrap();
        assert_eq!(removed.program.as_str(), "vim");
        assert!(store.is_empty());
        assert!(store.remove(pid).is_none());
    }
}
