//! Validated agent configuration

use crate::schema::{RawConfig, RawInventoryConfig, RawRetryConfig};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tally_util::{
    DEFAULT_DATABASE_FILENAME, MachineName, SPILL_LOG_FILENAME, UserName, default_data_dir,
    resolve_against,
};

/// Default seconds between snapshots
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

/// Default total write attempts per usage delta
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default retry queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Default dpkg status database
pub const DEFAULT_DPKG_STATUS: &str = "/var/lib/dpkg/status";

/// Default desktop-entry directories
pub const DEFAULT_DESKTOP_DIRS: &[&str] = &[
    "/usr/share/applications",
    "/usr/local/share/applications",
    "~/.local/share/applications",
];

/// Validated configuration ready for use by the agent
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Time between ticks
    pub poll_interval: Duration,

    /// Directory holding the database and spill log
    pub data_dir: PathBuf,

    /// Database file as configured (may be relative to `data_dir`)
    pub database: PathBuf,

    /// Explicit user identity; resolved from the OS when `None`
    pub user: Option<UserName>,

    /// Explicit machine identity; the hostname when `None`
    pub machine: Option<MachineName>,

    pub retry: RetryPolicy,

    pub inventory: InventoryConfig,
}

/// How failed usage writes are retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per delta, including the first
    pub max_attempts: u32,

    /// Maximum queued deltas
    pub queue_capacity: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Installed-software import settings
#[derive(Debug, Clone)]
pub struct InventoryConfig {
    pub enabled: bool,
    pub dpkg_status: Option<PathBuf>,
    pub desktop_dirs: Vec<PathBuf>,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dpkg_status: Some(PathBuf::from(DEFAULT_DPKG_STATUS)),
            desktop_dirs: DEFAULT_DESKTOP_DIRS.iter().map(PathBuf::from).collect(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            data_dir: default_data_dir(),
            database: PathBuf::from(DEFAULT_DATABASE_FILENAME),
            user: None,
            machine: None,
            retry: RetryPolicy::default(),
            inventory: InventoryConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        let defaults = Self::default();

        Self {
            poll_interval: raw
                .agent
                .poll_interval_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.poll_interval),
            data_dir: raw.agent.data_dir.unwrap_or(defaults.data_dir),
            database: raw.agent.database.unwrap_or(defaults.database),
            user: raw.agent.user.map(|u| UserName::new(u.trim())),
            machine: raw.agent.machine.map(|m| MachineName::new(m.trim())),
            retry: RetryPolicy::from_raw(raw.retry),
            inventory: InventoryConfig::from_raw(raw.inventory),
        }
    }

    /// Database location with `data_dir` applied
    pub fn database_path(&self) -> PathBuf {
        resolve_against(&self.data_dir, &self.database)
    }

    /// Location of the spill log
    pub fn spill_path(&self) -> PathBuf {
        self.data_dir.join(SPILL_LOG_FILENAME)
    }
}

impl RetryPolicy {
    fn from_raw(raw: RawRetryConfig) -> Self {
        let defaults = Self::default();
        Self {
            max_attempts: raw.max_attempts.unwrap_or(defaults.max_attempts),
            queue_capacity: raw.queue_capacity.unwrap_or(defaults.queue_capacity),
        }
    }
}

impl InventoryConfig {
    fn from_raw(raw: RawInventoryConfig) -> Self {
        let defaults = Self::default();

        // An empty path switches the dpkg source off
        let dpkg_status = match raw.dpkg_status {
            Some(path) if path.as_os_str().is_empty() => None,
            Some(path) => Some(path),
            None => defaults.dpkg_status,
        };

        Self {
            enabled: raw.enabled.unwrap_or(defaults.enabled),
            dpkg_status,
            desktop_dirs: raw.desktop_dirs.unwrap_or(defaults.desktop_dirs),
        }
    }

    /// Whether any source is configured at all
    pub fn has_sources(&self) -> bool {
        self.dpkg_status.is_some() || !self.desktop_dirs.is_empty()
    }
}

/// Paths the inventory should read, for display
pub fn describe_sources(inventory: &InventoryConfig) -> Vec<&Path> {
    inventory
        .dpkg_status
        .iter()
        .map(PathBuf::as_path)
        .chain(inventory.desktop_dirs.iter().map(PathBuf::as_path))
        .collect()
}
