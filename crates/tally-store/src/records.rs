//! Durable record types

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use tally_util::{MachineName, ProgramName, UserName};

/// Key of one usage aggregate row
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UsageKey {
    pub user: UserName,
    pub machine: MachineName,
    pub program: ProgramName,
}

impl UsageKey {
    pub fn new(
        user: impl Into<UserName>,
        machine: impl Into<MachineName>,
        program: impl Into<ProgramName>,
    ) -> Self {
        Self {
            user: user.into(),
            machine: machine.into(),
            program: program.into(),
        }
    }
}

impl fmt::Display for UsageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}/{}", self.user, self.machine, self.program)
    }
}

/// Accumulated usage for one key
#[derive(Debug, Clone, PartialEq)]
pub struct UsageSummary {
    pub key: UsageKey,
    pub total_seconds: f64,
    pub last_updated: DateTime<Local>,
}

/// Installed program row, keyed by (user, program_name)
#[derive(Debug, Clone, PartialEq)]
pub struct InstalledProgramRecord {
    pub user: UserName,
    pub program_name: ProgramName,
    pub version: Option<String>,
    pub publisher: Option<String>,
    pub install_location: Option<String>,
    pub last_checked: DateTime<Local>,
}
