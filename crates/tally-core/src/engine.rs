//! Tracking engine: per-tick reconciliation of snapshots against open sessions

use chrono::{DateTime, Local};
use std::collections::HashSet;
use std::sync::Arc;
use tally_config::RetryPolicy;
use tally_host_api::SnapshotSource;
use tally_store::{UsageKey, UsageSink};
use tally_util::{MachineName, ProcessId, ProgramName, UserName};
use tracing::{debug, error, info, warn};

use crate::{ClosedSession, CoreEvent, PendingWrite, RetryQueue, Session, SessionStore};

/// Who and where usage is attributed to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user: UserName,
    pub machine: MachineName,
}

impl Identity {
    pub fn new(user: impl Into<UserName>, machine: impl Into<MachineName>) -> Self {
        Self {
            user: user.into(),
            machine: machine.into(),
        }
    }

    pub fn usage_key(&self, program: &ProgramName) -> UsageKey {
        UsageKey {
            user: self.user.clone(),
            machine: self.machine.clone(),
            program: program.clone(),
        }
    }
}

/// What the engine still held when it was stopped
#[derive(Debug, Default)]
pub struct ShutdownSummary {
    /// Open sessions discarded without a usage write
    pub open_sessions: usize,

    /// Queued writes that never reached the sink, oldest first
    pub unwritten: Vec<PendingWrite>,
}

/// The session tracking engine.
///
/// Owns the session store and the retry queue. All state is mutated only
/// from [`TrackingEngine::tick`], which callers must never run concurrently
/// with itself; the `&mut self` receiver enforces that.
pub struct TrackingEngine {
    identity: Identity,
    source: Box<dyn SnapshotSource>,
    sink: Arc<dyn UsageSink>,
    sessions: SessionStore,
    retry: RetryQueue,
    max_attempts: u32,
    ticks: u64,
}

impl TrackingEngine {
    pub fn new(
        identity: Identity,
        source: Box<dyn SnapshotSource>,
        sink: Arc<dyn UsageSink>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            identity,
            source,
            sink,
            sessions: SessionStore::new(),
            retry: RetryQueue::new(policy.queue_capacity),
            max_attempts: policy.max_attempts.max(1),
            ticks: 0,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Writes waiting for a retry, oldest first
    pub fn pending_writes(&self) -> impl Iterator<Item = &PendingWrite> {
        self.retry.iter()
    }

    /// Number of ticks run so far, including skipped ones
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Run one poll-diff-reconcile cycle with `now` as the tick time.
    ///
    /// New sessions are opened before finished ones are closed. Every usage
    /// write for this tick is issued before returning. A snapshot failure
    /// leaves all state untouched and makes no sink calls.
    ///
    /// Pid reuse is not detected: a pid already tracked is never reopened,
    /// even if the sample now carries a different name or create time.
    pub fn tick(&mut self, now: DateTime<Local>) -> Vec<CoreEvent> {
        self.ticks += 1;
        let tick = self.ticks;
        let mut events = Vec::new();

        let snapshot = match self.source.list_processes() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(tick, error = %e, "Process snapshot failed, skipping tick");
                events.push(CoreEvent::SnapshotFailed {
                    error: e.to_string(),
                });
                return events;
            }
        };

        let mut live = HashSet::with_capacity(snapshot.len());
        let mut opened = 0usize;
        for sample in snapshot {
            live.insert(sample.pid);
            if self.sessions.contains(sample.pid) {
                continue;
            }

            opened += 1;
            debug!(pid = %sample.pid, program = %sample.name, "Session opened");
            events.push(CoreEvent::SessionOpened {
                pid: sample.pid,
                program: sample.name.clone(),
                start_time: sample.create_time,
            });
            self.sessions
                .insert(sample.pid, Session::new(sample.name, sample.create_time));
        }

        let mut finished: Vec<ProcessId> = self
            .sessions
            .current_keys()
            .difference(&live)
            .copied()
            .collect();
        finished.sort();
        let closed = finished.len();

        for pid in finished {
            let Some(session) = self.sessions.remove(pid) else {
                continue;
            };
            self.account(session.close(pid, now), tick, &mut events);
        }

        self.retry_pending(tick, now, &mut events);

        debug!(
            tick,
            live = live.len(),
            tracked = self.sessions.len(),
            opened,
            closed,
            pending = self.retry.len(),
            "Tick complete"
        );

        events
    }

    /// Stop tracking: discard open sessions and hand back unwritten usage
    pub fn shutdown(&mut self) -> ShutdownSummary {
        let open_sessions = self.sessions.len();
        self.sessions.clear();
        let unwritten = self.retry.drain();

        info!(
            open_sessions,
            unwritten = unwritten.len(),
            "Tracking engine stopped"
        );

        ShutdownSummary {
            open_sessions,
            unwritten,
        }
    }

    fn account(&mut self, closed: ClosedSession, tick: u64, events: &mut Vec<CoreEvent>) {
        if let Some(skew_seconds) = closed.skew_seconds {
            warn!(
                pid = %closed.pid,
                program = %closed.program,
                skew_seconds,
                "Session ended before it started, duration clamped to zero"
            );
            events.push(CoreEvent::ClockSkewClamped {
                pid: closed.pid,
                program: closed.program.clone(),
                skew_seconds,
            });
        }

        let key = self.identity.usage_key(&closed.program);
        let new_total = match self
            .sink
            .upsert_usage(&key, closed.duration_seconds, closed.ended_at)
        {
            Ok(total) => {
                info!(
                    pid = %closed.pid,
                    program = %closed.program,
                    duration_secs = closed.duration_seconds,
                    total_seconds = total,
                    "Session closed"
                );
                Some(total)
            }
            Err(e) => {
                warn!(
                    key = %key,
                    delta_secs = closed.duration_seconds,
                    error = %e,
                    "Usage write failed"
                );
                events.push(CoreEvent::UsageWriteFailed {
                    key: key.clone(),
                    delta_seconds: closed.duration_seconds,
                    attempts: 1,
                    error: e.to_string(),
                });
                self.enqueue(
                    PendingWrite {
                        key,
                        delta_seconds: closed.duration_seconds,
                        closed_at: closed.ended_at,
                        attempts: 1,
                        last_attempt_tick: tick,
                        last_error: e.to_string(),
                    },
                    events,
                );
                None
            }
        };

        events.push(CoreEvent::SessionClosed {
            pid: closed.pid,
            program: closed.program,
            duration_seconds: closed.duration_seconds,
            new_total,
        });
    }

    fn enqueue(&mut self, write: PendingWrite, events: &mut Vec<CoreEvent>) {
        if write.attempts >= self.max_attempts {
            abandon(write, events);
            return;
        }
        if let Some(evicted) = self.retry.push(write) {
            warn!(key = %evicted.key, "Retry queue full, evicting oldest write");
            abandon(evicted, events);
        }
    }

    /// Retry every write queued before this tick, once each, oldest first
    fn retry_pending(&mut self, tick: u64, now: DateTime<Local>, events: &mut Vec<CoreEvent>) {
        if self.retry.is_empty() {
            return;
        }

        for mut write in self.retry.drain() {
            if write.last_attempt_tick >= tick {
                self.enqueue(write, events);
                continue;
            }

            write.attempts += 1;
            write.last_attempt_tick = tick;
            match self.sink.upsert_usage(&write.key, write.delta_seconds, now) {
                Ok(total) => {
                    info!(
                        key = %write.key,
                        delta_secs = write.delta_seconds,
                        attempts = write.attempts,
                        total_seconds = total,
                        "Queued usage write recovered"
                    );
                    events.push(CoreEvent::UsageRecovered {
                        key: write.key,
                        delta_seconds: write.delta_seconds,
                        attempts: write.attempts,
                    });
                }
                Err(e) => {
                    warn!(
                        key = %write.key,
                        attempts = write.attempts,
                        error = %e,
                        "Usage write retry failed"
                    );
                    write.last_error = e.to_string();
                    events.push(CoreEvent::UsageWriteFailed {
                        key: write.key.clone(),
                        delta_seconds: write.delta_seconds,
                        attempts: write.attempts,
                        error: e.to_string(),
                    });
                    self.enqueue(write, events);
                }
            }
        }
    }
}

fn abandon(write: PendingWrite, events: &mut Vec<CoreEvent>) {
    error!(
        key = %write.key,
        delta_secs = write.delta_seconds,
        closed_at = %tally_util::format_datetime_full(&write.closed_at),
        attempts = write.attempts,
        last_error = %write.last_error,
        "Giving up on usage write"
    );
    events.push(CoreEvent::UsageAbandoned { write });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::sync::Mutex;
    use tally_host_api::{MockSnapshotSource, ProcessSample};
    use tally_store::{SqliteStore, Store, StoreError, StoreResult};

    fn t0() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap()
    }

    fn secs(n: i64) -> DateTime<Local> {
        t0() + Duration::seconds(n)
    }

    /// SQLite-backed sink that records every call and can be told to fail
    struct RecordingSink {
        store: SqliteStore,
        calls: Mutex<Vec<(UsageKey, f64)>>,
        failing: Mutex<bool>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                store: SqliteStore::in_memory().unwrap(),
                calls: Mutex::new(Vec::new()),
                failing: Mutex::new(false),
            })
        }

        fn set_failing(&self, failing: bool) {
            *self.failing.lock().unwrap() = failing;
        }

        fn calls(&self) -> Vec<(UsageKey, f64)> {
            self.calls.lock().unwrap().clone()
        }

        fn total(&self, program: &str) -> Option<f64> {
            self.store
                .get_usage(&UsageKey::new("alice", "desk-01", program))
                .unwrap()
                .map(|s| s.total_seconds)
        }
    }

    impl UsageSink for RecordingSink {
        fn upsert_usage(
            &self,
            key: &UsageKey,
            delta_seconds: f64,
            at: DateTime<Local>,
        ) -> StoreResult<f64> {
            self.calls
                .lock()
                .unwrap()
                .push((key.clone(), delta_seconds));
            if *self.failing.lock().unwrap() {
                return Err(StoreError::Database("database is locked".into()));
            }
            self.store.upsert_usage(key, delta_seconds, at)
        }
    }

    fn engine_with(
        policy: RetryPolicy,
    ) -> (TrackingEngine, MockSnapshotSource, Arc<RecordingSink>) {
        let source = MockSnapshotSource::new();
        let sink = RecordingSink::new();
        let engine = TrackingEngine::new(
            Identity::new("alice", "desk-01"),
            Box::new(source.clone()),
            sink.clone(),
            policy,
        );
        (engine, source, sink)
    }

    fn engine() -> (TrackingEngine, MockSnapshotSource, Arc<RecordingSink>) {
        engine_with(RetryPolicy {
            max_attempts: 3,
            queue_capacity: 16,
        })
    }

    fn sample(pid: u32, name: &str, created: DateTime<Local>) -> ProcessSample {
        ProcessSample::new(pid, name, created)
    }

    #[test]
    fn single_process_lifecycle() {
        let (mut engine, source, sink) = engine();

        source.push_snapshot(vec![sample(100, "app.exe", t0())]);
        let events = engine.tick(t0());
        assert!(matches!(events[..], [CoreEvent::SessionOpened { .. }]));
        assert!(engine.sessions().contains(ProcessId::new(100)));
        assert!(sink.calls().is_empty());

        source.push_snapshot(vec![]);
        let events = engine.tick(secs(60));
        assert!(engine.sessions().is_empty());
        assert_eq!(
            sink.calls(),
            vec![(UsageKey::new("alice", "desk-01", "app.exe"), 60.0)]
        );
        assert_eq!(sink.total("app.exe"), Some(60.0));
        assert!(events.contains(&CoreEvent::SessionClosed {
            pid: ProcessId::new(100),
            program: "app.exe".into(),
            duration_seconds: 60.0,
            new_total: Some(60.0),
        }));
    }

    #[test]
    fn same_program_two_pids_sum() {
        let (mut engine, source, sink) = engine();

        source.push_snapshot(vec![
            sample(100, "app.exe", t0()),
            sample(101, "app.exe", secs(30)),
        ]);
        engine.tick(secs(30));

        source.push_snapshot(vec![]);
        engine.tick(secs(90));

        assert_eq!(sink.calls().len(), 2);
        assert_eq!(sink.total("app.exe"), Some(150.0));
    }

    #[test]
    fn long_lived_process_closes_once() {
        let (mut engine, source, sink) = engine();

        for n in 0..5 {
            source.push_snapshot(vec![sample(7, "editor", t0())]);
            engine.tick(secs(n * 60));
        }
        assert!(sink.calls().is_empty());

        source.push_snapshot(vec![]);
        engine.tick(secs(300));

        assert_eq!(
            sink.calls(),
            vec![(UsageKey::new("alice", "desk-01", "editor"), 300.0)]
        );
    }

    #[test]
    fn start_is_anchored_to_create_time() {
        let (mut engine, source, sink) = engine();

        // First observed 50 seconds after it started
        source.push_snapshot(vec![sample(9, "make", secs(-50))]);
        engine.tick(t0());
        source.push_snapshot(vec![]);
        engine.tick(secs(60));

        assert_eq!(sink.calls()[0].1, 110.0);
    }

    #[test]
    fn snapshot_failure_changes_nothing() {
        let (mut engine, source, sink) = engine();

        source.push_snapshot(vec![sample(100, "app.exe", t0())]);
        engine.tick(t0());

        source.push_failure("permission denied");
        let events = engine.tick(secs(60));

        assert!(matches!(events[..], [CoreEvent::SnapshotFailed { .. }]));
        assert!(engine.sessions().contains(ProcessId::new(100)));
        assert!(sink.calls().is_empty());

        // Duration extends into the next successful tick
        source.push_snapshot(vec![]);
        engine.tick(secs(120));
        assert_eq!(sink.total("app.exe"), Some(120.0));
    }

    #[test]
    fn snapshot_failure_skips_retries() {
        let (mut engine, source, sink) = engine();

        source.push_snapshot(vec![sample(1, "a", t0())]);
        engine.tick(t0());
        sink.set_failing(true);
        source.push_snapshot(vec![]);
        engine.tick(secs(10));
        assert_eq!(sink.calls().len(), 1);

        source.push_failure("transient");
        engine.tick(secs(20));
        assert_eq!(sink.calls().len(), 1);
        assert_eq!(engine.pending_writes().count(), 1);
    }

    #[test]
    fn failed_write_does_not_block_others() {
        struct RejectOne(Arc<RecordingSink>);

        impl UsageSink for RejectOne {
            fn upsert_usage(
                &self,
                key: &UsageKey,
                delta_seconds: f64,
                at: DateTime<Local>,
            ) -> StoreResult<f64> {
                if key.program.as_str() == "bad" {
                    return Err(StoreError::Database("constraint failed".into()));
                }
                self.0.upsert_usage(key, delta_seconds, at)
            }
        }

        let source = MockSnapshotSource::new();
        let recorder = RecordingSink::new();
        let mut engine = TrackingEngine::new(
            Identity::new("alice", "desk-01"),
            Box::new(source.clone()),
            Arc::new(RejectOne(recorder.clone())),
            RetryPolicy {
                max_attempts: 3,
                queue_capacity: 16,
            },
        );

        source.push_snapshot(vec![sample(1, "bad", t0()), sample(2, "good", t0())]);
        engine.tick(t0());
        source.push_snapshot(vec![]);
        let events = engine.tick(secs(45));

        assert_eq!(recorder.total("good"), Some(45.0));
        assert!(events.iter().any(|e| matches!(
            e,
            CoreEvent::UsageWriteFailed { key, attempts: 1, .. } if key.program.as_str() == "bad"
        )));
        assert_eq!(engine.pending_writes().count(), 1);
    }

    #[test]
    fn queued_write_recovers_on_later_tick() {
        let (mut engine, source, sink) = engine();

        source.push_snapshot(vec![sample(5, "gimp", t0())]);
        engine.tick(t0());

        sink.set_failing(true);
        source.push_snapshot(vec![]);
        engine.tick(secs(30));
        // Not retried within the tick that failed
        assert_eq!(sink.calls().len(), 1);
        assert_eq!(sink.total("gimp"), None);

        sink.set_failing(false);
        source.push_snapshot(vec![]);
        let events = engine.tick(secs(90));

        assert_eq!(sink.total("gimp"), Some(30.0));
        assert!(events.contains(&CoreEvent::UsageRecovered {
            key: UsageKey::new("alice", "desk-01", "gimp"),
            delta_seconds: 30.0,
            attempts: 2,
        }));
        assert_eq!(engine.pending_writes().count(), 0);
    }

    #[test]
    fn write_abandoned_after_max_attempts() {
        let (mut engine, source, sink) = engine();

        source.push_snapshot(vec![sample(5, "gimp", t0())]);
        engine.tick(t0());
        sink.set_failing(true);

        let mut abandoned = Vec::new();
        for n in 1..=4 {
            source.push_snapshot(vec![]);
            for event in engine.tick(secs(n * 60)) {
                if let CoreEvent::UsageAbandoned { write } = event {
                    abandoned.push(write);
                }
            }
        }

        // One initial attempt plus two retries
        assert_eq!(sink.calls().len(), 3);
        assert_eq!(abandoned.len(), 1);
        assert_eq!(abandoned[0].attempts, 3);
        assert_eq!(abandoned[0].delta_seconds, 60.0);
        assert_eq!(engine.pending_writes().count(), 0);
    }

    #[test]
    fn single_attempt_policy_abandons_immediately() {
        let (mut engine, source, sink) = engine_with(RetryPolicy {
            max_attempts: 1,
            queue_capacity: 16,
        });
        sink.set_failing(true);

        source.push_snapshot(vec![sample(5, "gimp", t0())]);
        engine.tick(t0());
        source.push_snapshot(vec![]);
        let events = engine.tick(secs(10));

        assert!(
            events
                .iter()
                .any(|e| matches!(e, CoreEvent::UsageAbandoned { .. }))
        );
        assert_eq!(engine.pending_writes().count(), 0);
    }

    #[test]
    fn full_queue_evicts_oldest_write() {
        let (mut engine, source, sink) = engine_with(RetryPolicy {
            max_attempts: 10,
            queue_capacity: 1,
        });
        sink.set_failing(true);

        source.push_snapshot(vec![sample(1, "first", t0()), sample(2, "second", t0())]);
        engine.tick(t0());
        source.push_snapshot(vec![]);
        let events = engine.tick(secs(10));

        let abandoned: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                CoreEvent::UsageAbandoned { write } => Some(write.key.program.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(abandoned, vec!["first"]);
        let pending: Vec<_> = engine
            .pending_writes()
            .map(|w| w.key.program.as_str().to_string())
            .collect();
        assert_eq!(pending, vec!["second".to_string()]);
    }

    #[test]
    fn clock_skew_is_clamped_and_flagged() {
        let (mut engine, source, sink) = engine();

        source.push_snapshot(vec![sample(3, "odd", secs(120))]);
        engine.tick(secs(120));
        source.push_snapshot(vec![]);
        let events = engine.tick(secs(60));

        assert!(events.contains(&CoreEvent::ClockSkewClamped {
            pid: ProcessId::new(3),
            program: "odd".into(),
            skew_seconds: 60.0,
        }));
        assert_eq!(sink.calls()[0].1, 0.0);
        assert_eq!(sink.total("odd"), Some(0.0));
    }

    #[test]
    fn opens_happen_before_closes() {
        let (mut engine, source, _sink) = engine();

        source.push_snapshot(vec![sample(1, "old", t0())]);
        engine.tick(t0());
        source.push_snapshot(vec![sample(2, "new", secs(30))]);
        let events = engine.tick(secs(60));

        assert!(matches!(events[0], CoreEvent::SessionOpened { .. }));
        assert!(matches!(events[1], CoreEvent::SessionClosed { .. }));
    }

    #[test]
    fn recycled_pid_continues_the_original_session() {
        let (mut engine, source, sink) = engine();

        source.push_snapshot(vec![sample(7, "editor", t0())]);
        engine.tick(t0());

        // pid 7 exited and was reused by another program between snapshots
        source.push_snapshot(vec![sample(7, "game", secs(30))]);
        let events = engine.tick(secs(60));
        assert!(events.is_empty());
        assert_eq!(engine.sessions().len(), 1);

        source.push_snapshot(vec![]);
        engine.tick(secs(120));

        assert_eq!(sink.total("editor"), Some(120.0));
        assert_eq!(sink.total("game"), None);
    }

    #[test]
    fn shutdown_discards_sessions_and_returns_queue() {
        let (mut engine, source, sink) = engine();

        source.push_snapshot(vec![sample(1, "a", t0()), sample(2, "b", t0())]);
        engine.tick(t0());
        sink.set_failing(true);
        source.push_snapshot(vec![sample(2, "b", t0())]);
        engine.tick(secs(20));

        let summary = engine.shutdown();

        assert_eq!(summary.open_sessions, 1);
        assert_eq!(summary.unwritten.len(), 1);
        assert_eq!(summary.unwritten[0].key.program.as_str(), "a");
        assert!(engine.sessions().is_empty());
        assert_eq!(engine.pending_writes().count(), 0);
    }
}
