//! SQLite-based store implementation

use chrono::{DateTime, Local};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tally_util::{MachineName, ProgramName, UserName};
use tracing::{debug, warn};

use crate::traits::check_delta;
use crate::{
    AuditEvent, InstalledProgramRecord, InventorySink, Store, StoreError, StoreResult, UsageKey,
    UsageSink, UsageSummary,
};

/// SQLite-based store.
///
/// All access goes through one connection behind a mutex, which serialises
/// writers and makes each upsert atomic per key.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            -- Accumulated usage per user, machine and program
            CREATE TABLE IF NOT EXISTS program_usage_summary (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user TEXT NOT NULL,
                machine TEXT NOT NULL,
                program_name TEXT NOT NULL,
                total_seconds REAL NOT NULL DEFAULT 0,
                last_updated TEXT NOT NULL,
                UNIQUE (user, machine, program_name)
            );

            -- Installed software per user
            CREATE TABLE IF NOT EXISTS installed_programs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user TEXT NOT NULL,
                program_name TEXT NOT NULL,
                version TEXT,
                publisher TEXT,
                install_location TEXT,
                last_checked TEXT NOT NULL,
                UNIQUE (user, program_name)
            );

            -- Audit log (append-only)
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                event_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);
            "#,
        )?;

        debug!("Store schema initialized");
        Ok(())
    }
}

fn parse_timestamp(s: &str) -> DateTime<Local> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Local))
        .unwrap_or_else(|_| {
            warn!(timestamp = %s, "Unparseable timestamp in store");
            tally_util::now()
        })
}

fn usage_from_row(row: &Row<'_>) -> rusqlite::Result<UsageSummary> {
    let user: String = row.get(0)?;
    let machine: String = row.get(1)?;
    let program: String = row.get(2)?;
    let total_seconds: f64 = row.get(3)?;
    let last_updated: String = row.get(4)?;

    Ok(UsageSummary {
        key: UsageKey::new(user, machine, program),
        total_seconds,
        last_updated: parse_timestamp(&last_updated),
    })
}

fn installed_from_row(row: &Row<'_>) -> rusqlite::Result<InstalledProgramRecord> {
    let user: String = row.get(0)?;
    let program_name: String = row.get(1)?;
    let last_checked: String = row.get(5)?;

    Ok(InstalledProgramRecord {
        user: UserName::new(user),
        program_name: ProgramName::new(program_name),
        version: row.get(2)?,
        publisher: row.get(3)?,
        install_location: row.get(4)?,
        last_checked: parse_timestamp(&last_checked),
    })
}

impl UsageSink for SqliteStore {
    fn upsert_usage(
        &self,
        key: &UsageKey,
        delta_seconds: f64,
        at: DateTime<Local>,
    ) -> StoreResult<f64> {
        check_delta(delta_seconds)?;
        let conn = self.conn()?;

        let total: f64 = conn.query_row(
            r#"
            INSERT INTO program_usage_summary (user, machine, program_name, total_seconds, last_updated)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(user, machine, program_name)
            DO UPDATE SET total_seconds = total_seconds + excluded.total_seconds,
                          last_updated = excluded.last_updated
            RETURNING total_seconds
            "#,
            params![
                key.user.as_str(),
                key.machine.as_str(),
                key.program.as_str(),
                delta_seconds,
                at.to_rfc3339()
            ],
            |row| row.get(0),
        )?;

        debug!(key = %key, delta_secs = delta_seconds, total_secs = total, "Usage added");
        Ok(total)
    }
}

impl InventorySink for SqliteStore {
    fn upsert_installed_program(&self, record: &InstalledProgramRecord) -> StoreResult<()> {
        let conn = self.conn()?;

        conn.execute(
            r#"
            INSERT INTO installed_programs
                (user, program_name, version, publisher, install_location, last_checked)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(user, program_name)
            DO UPDATE SET version = excluded.version,
                          publisher = excluded.publisher,
                          install_location = excluded.install_location,
                          last_checked = excluded.last_checked
            "#,
            params![
                record.user.as_str(),
                record.program_name.as_str(),
                record.version,
                record.publisher,
                record.install_location,
                record.last_checked.to_rfc3339()
            ],
        )?;

        Ok(())
    }
}

impl Store for SqliteStore {
    fn append_audit(&self, mut event: AuditEvent) -> StoreResult<()> {
        let conn = self.conn()?;
        let event_json = serde_json::to_string(&event.event)?;

        conn.execute(
            "INSERT INTO audit_log (timestamp, event_json) VALUES (?, ?)",
            params![event.timestamp.to_rfc3339(), event_json],
        )?;

        event.id = conn.last_insert_rowid();
        debug!(event_id = event.id, "Audit event appended");

        Ok(())
    }

    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT id, timestamp, event_json FROM audit_log ORDER BY id DESC LIMIT ?",
        )?;

        let rows = stmt.query_map([limit], |row| {
            let id: i64 = row.get(0)?;
            let timestamp_str: String = row.get(1)?;
            let event_json: String = row.get(2)?;
            Ok((id, timestamp_str, event_json))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, timestamp_str, event_json) = row?;
            let event: crate::AuditEventType = serde_json::from_str(&event_json)?;

            events.push(AuditEvent {
                id,
                timestamp: parse_timestamp(&timestamp_str),
                event,
            });
        }

        Ok(events)
    }

    fn get_usage(&self, key: &UsageKey) -> StoreResult<Option<UsageSummary>> {
        let conn = self.conn()?;

        let summary = conn
            .query_row(
                r#"
                SELECT user, machine, program_name, total_seconds, last_updated
                FROM program_usage_summary
                WHERE user = ? AND machine = ? AND program_name = ?
                "#,
                params![key.user.as_str(), key.machine.as_str(), key.program.as_str()],
                usage_from_row,
            )
            .optional()?;

        Ok(summary)
    }

    fn list_usage(&self, user: &UserName, machine: &MachineName) -> StoreResult<Vec<UsageSummary>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            r#"
            SELECT user, machine, program_name, total_seconds, last_updated
            FROM program_usage_summary
            WHERE user = ? AND machine = ?
            ORDER BY total_seconds DESC, program_name ASC
            "#,
        )?;

        let rows = stmt.query_map(params![user.as_str(), machine.as_str()], usage_from_row)?;
        let summaries = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(summaries)
    }

    fn get_installed_program(
        &self,
        user: &UserName,
        program: &ProgramName,
    ) -> StoreResult<Option<InstalledProgramRecord>> {
        let conn = self.conn()?;

        let record = conn
            .query_row(
                r#"
                SELECT user, program_name, version, publisher, install_location, last_checked
                FROM installed_programs
                WHERE user = ? AND program_name = ?
                "#,
                params![user.as_str(), program.as_str()],
                installed_from_row,
            )
            .optional()?;

        Ok(record)
    }

    fn list_installed_programs(&self, user: &UserName) -> StoreResult<Vec<InstalledProgramRecord>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            r#"
            SELECT user, program_name, version, publisher, install_location, last_checked
            FROM installed_programs
            WHERE user = ?
            ORDER BY program_name ASC
            "#,
        )?;

        let rows = stmt.query_map([user.as_str()], installed_from_row)?;
        let records = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn is_healthy(&self) -> bool {
        match self.conn.lock() {
            Ok(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            Err(_) => {
                warn!("Store lock poisoned");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AuditEventType;
    use chrono::TimeZone;

    fn key(program: &str) -> UsageKey {
        UsageKey::new("alice", "desk-01", program)
    }

    fn at(minute: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 6, 2, 9, minute, 0).unwrap()
    }

    #[test]
    fn test_in_memory_store() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.is_healthy());
    }

    #[test]
    fn test_schema_init_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tally.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.upsert_usage(&key("vim"), 12.0, at(0)).unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let summary = store.get_usage(&key("vim")).unwrap().unwrap();
        assert_eq!(summary.total_seconds, 12.0);
    }

    #[test]
    fn test_usage_accumulates() {
        let store = SqliteStore::in_memory().unwrap();

        // Initially absent
        assert!(store.get_usage(&key("firefox")).unwrap().is_none());

        let total = store.upsert_usage(&key("firefox"), 300.0, at(0)).unwrap();
        assert_eq!(total, 300.0);

        let total = store.upsert_usage(&key("firefox"), 200.5, at(5)).unwrap();
        assert_eq!(total, 500.5);

        let summary = store.get_usage(&key("firefox")).unwrap().unwrap();
        assert_eq!(summary.total_seconds, 500.5);
        assert_eq!(summary.last_updated, at(5));
    }

    #[test]
    fn test_usage_is_order_independent() {
        let a = SqliteStore::in_memory().unwrap();
        let b = SqliteStore::in_memory().unwrap();

        a.upsert_usage(&key("gimp"), 1.25, at(0)).unwrap();
        a.upsert_usage(&key("gimp"), 40.0, at(1)).unwrap();
        b.upsert_usage(&key("gimp"), 40.0, at(0)).unwrap();
        b.upsert_usage(&key("gimp"), 1.25, at(1)).unwrap();

        let total_a = a.get_usage(&key("gimp")).unwrap().unwrap().total_seconds;
        let total_b = b.get_usage(&key("gimp")).unwrap().unwrap().total_seconds;
        assert_eq!(total_a, 41.25);
        assert_eq!(total_a, total_b);
    }

    #[test]
    fn test_keys_are_isolated() {
        let store = SqliteStore::in_memory().unwrap();

        store.upsert_usage(&key("vim"), 10.0, at(0)).unwrap();
        store
            .upsert_usage(&UsageKey::new("alice", "laptop", "vim"), 99.0, at(0))
            .unwrap();
        store
            .upsert_usage(&UsageKey::new("bob", "desk-01", "vim"), 7.0, at(0))
            .unwrap();

        assert_eq!(store.get_usage(&key("vim")).unwrap().unwrap().total_seconds, 10.0);

        let listed = store
            .list_usage(&UserName::new("alice"), &MachineName::new("desk-01"))
            .unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[test]
    fn test_list_usage_orders_by_total() {
        let store = SqliteStore::in_memory().unwrap();
        store.upsert_usage(&key("small"), 1.0, at(0)).unwrap();
        store.upsert_usage(&key("big"), 100.0, at(0)).unwrap();

        let listed = store
            .list_usage(&UserName::new("alice"), &MachineName::new("desk-01"))
            .unwrap();
        let names: Vec<_> = listed.iter().map(|s| s.key.program.as_str()).collect();
        assert_eq!(names, vec!["big", "small"]);
    }

    #[test]
    fn test_negative_delta_rejected() {
        let store = SqliteStore::in_memory().unwrap();

        assert!(matches!(
            store.upsert_usage(&key("vim"), -1.0, at(0)),
            Err(StoreError::InvalidDelta(_))
        ));
        assert!(matches!(
            store.upsert_usage(&key("vim"), f64::NAN, at(0)),
            Err(StoreError::InvalidDelta(_))
        ));
        assert!(store.get_usage(&key("vim")).unwrap().is_none());
    }

    #[test]
    fn test_installed_program_last_write_wins() {
        let store = SqliteStore::in_memory().unwrap();
        let user = UserName::new("alice");

        let mut record = InstalledProgramRecord {
            user: user.clone(),
            program_name: ProgramName::new("git"),
            version: Some("2.39".into()),
            publisher: Some("Debian".into()),
            install_location: None,
            last_checked: at(0),
        };
        store.upsert_installed_program(&record).unwrap();

        record.version = Some("2.43".into());
        record.publisher = None;
        record.last_checked = at(30);
        store.upsert_installed_program(&record).unwrap();

        let stored = store
            .get_installed_program(&user, &ProgramName::new("git"))
            .unwrap()
            .unwrap();
        assert_eq!(stored.version.as_deref(), Some("2.43"));
        assert!(stored.publisher.is_none());
        assert_eq!(stored.last_checked, at(30));
        assert_eq!(store.list_installed_programs(&user).unwrap().len(), 1);
    }

    #[test]
    fn test_audit_log() {
        let store = SqliteStore::in_memory().unwrap();

        store
            .append_audit(AuditEvent::new(AuditEventType::AgentStarted {
                user: UserName::new("alice"),
                machine: MachineName::new("desk-01"),
                poll_interval_secs: 60,
            }))
            .unwrap();
        store
            .append_audit(AuditEvent::new(AuditEventType::AgentStopped {
                open_sessions: 3,
                spilled_writes: 0,
            }))
            .unwrap();

        let events = store.get_recent_audits(10).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0].event,
            AuditEventType::AgentStopped { open_sessions: 3, .. }
        ));
        assert!(matches!(events[1].event, AuditEventType::AgentStarted { .. }));
    }
}
