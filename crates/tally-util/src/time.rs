//! Time utilities for tally
//!
//! Session durations are wall-clock differences: a session starts at the
//! process create time reported by the OS and ends at the capture instant of
//! the first snapshot that no longer contains it.
//!
//! # Mock Time for Development
//!
//! In debug builds, the `TALLY_MOCK_TIME` environment variable can be set
//! to override the agent's notion of "now". Process create times still come
//! from the OS, so this is mostly useful for provoking clock-skew handling.
//!
//! Format: `YYYY-MM-DD HH:MM:SS` (e.g., `2025-12-25 14:30:00`)

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use std::sync::OnceLock;

/// Environment variable name for mock time (debug builds only)
pub const MOCK_TIME_ENV_VAR: &str = "TALLY_MOCK_TIME";

/// Format accepted by `TALLY_MOCK_TIME`
pub const MOCK_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Cached mock time offset from the real time when the process started.
/// This allows mock time to advance naturally.
static MOCK_TIME_OFFSET: OnceLock<Option<chrono::Duration>> = OnceLock::new();

fn get_mock_time_offset() -> Option<chrono::Duration> {
    *MOCK_TIME_OFFSET.get_or_init(|| {
        #[cfg(debug_assertions)]
        {
            if let Ok(mock_time_str) = std::env::var(MOCK_TIME_ENV_VAR) {
                if let Ok(naive_dt) = NaiveDateTime::parse_from_str(&mock_time_str, MOCK_TIME_FORMAT) {
                    if let Some(mock_dt) = Local.from_local_datetime(&naive_dt).single() {
                        let offset = mock_dt.signed_duration_since(chrono::Local::now());
                        tracing::info!(
                            mock_time = %mock_time_str,
                            offset_secs = offset.num_seconds(),
                            "Mock time enabled"
                        );
                        return Some(offset);
                    }
                    tracing::warn!(
                        mock_time = %mock_time_str,
                        "Failed to convert mock time to local timezone"
                    );
                } else {
                    tracing::warn!(
                        mock_time = %mock_time_str,
                        expected_format = MOCK_TIME_FORMAT,
                        "Invalid mock time format"
                    );
                }
            }
            None
        }
        #[cfg(not(debug_assertions))]
        {
            None
        }
    })
}

/// Returns whether mock time is currently active.
pub fn is_mock_time_active() -> bool {
    get_mock_time_offset().is_some()
}

/// Get the current local time, respecting mock time settings in debug builds.
pub fn now() -> DateTime<Local> {
    let real_now = chrono::Local::now();

    if let Some(offset) = get_mock_time_offset() {
        real_now + offset
    } else {
        real_now
    }
}

/// Format a DateTime with full date and time.
pub fn format_datetime_full(dt: &DateTime<Local>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Signed number of seconds from `start` to `end`, with millisecond resolution.
///
/// Negative when `end` precedes `start`.
pub fn seconds_between(start: DateTime<Local>, end: DateTime<Local>) -> f64 {
    end.signed_duration_since(start).num_milliseconds() as f64 / 1000.0
}

/// Convert seconds since the Unix epoch into local time.
///
/// Returns `None` for zero (the OS's "unknown") or values chrono cannot represent.
pub fn from_unix_seconds(secs: u64) -> Option<DateTime<Local>> {
    if secs == 0 {
        return None;
    }
    let secs = i64::try_from(secs).ok()?;
    Local.timestamp_opt(secs, 0).single()
}
