//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Tracking settings
    #[serde(default)]
    pub agent: RawAgentConfig,

    /// Failed-write retry settings
    #[serde(default)]
    pub retry: RawRetryConfig,

    /// Installed-software import settings
    #[serde(default)]
    pub inventory: RawInventoryConfig,
}

/// Agent-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawAgentConfig {
    /// Seconds between process snapshots (default: 60)
    pub poll_interval_seconds: Option<u64>,

    /// Data directory for the database and spill log
    pub data_dir: Option<PathBuf>,

    /// Database file; relative paths resolve against data_dir
    pub database: Option<PathBuf>,

    /// User identity recorded with usage (default: resolved from the OS)
    pub user: Option<String>,

    /// Machine identity recorded with usage (default: hostname)
    pub machine: Option<String>,
}

/// Retry settings for usage writes the store rejected
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawRetryConfig {
    /// Total attempts per delta, including the first (default: 5)
    pub max_attempts: Option<u32>,

    /// Maximum queued deltas before the oldest is spilled (default: 1024)
    pub queue_capacity: Option<usize>,
}

/// Inventory import settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawInventoryConfig {
    /// Import installed software at startup (default: true)
    pub enabled: Option<bool>,

    /// dpkg status database; empty string disables the source
    pub dpkg_status: Option<PathBuf>,

    /// Directories of XDG desktop entries
    pub desktop_dirs: Option<Vec<PathBuf>>,
}
