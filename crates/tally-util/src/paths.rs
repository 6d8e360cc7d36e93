//! Default paths for tally components
//!
//! Paths are user-writable by default (no root required):
//! - Config: `$XDG_CONFIG_HOME/tally/config.toml` or `~/.config/tally/config.toml`
//! - Data: `$XDG_DATA_HOME/tally` or `~/.local/share/tally`

use std::path::{Path, PathBuf};

/// Environment variable for overriding the config file path
pub const TALLY_CONFIG_ENV: &str = "TALLY_CONFIG";

/// Environment variable for overriding the data directory
pub const TALLY_DATA_DIR_ENV: &str = "TALLY_DATA_DIR";

/// Default database filename within the data directory
pub const DEFAULT_DATABASE_FILENAME: &str = "tally.db";

/// Spill log filename within the data directory
pub const SPILL_LOG_FILENAME: &str = "pending_usage.jsonl";

/// Application subdirectory name
const APP_DIR: &str = "tally";

/// Config filename within the config directory
const CONFIG_FILENAME: &str = "config.toml";

/// Get the default config file path.
///
/// Order of precedence:
/// 1. `$XDG_CONFIG_HOME/tally/config.toml` (if XDG_CONFIG_HOME is set)
/// 2. `~/.config/tally/config.toml` (fallback)
pub fn default_config_path() -> PathBuf {
    if let Ok(config_home) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(config_home).join(APP_DIR).join(CONFIG_FILENAME);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join(APP_DIR)
            .join(CONFIG_FILENAME);
    }

    PathBuf::from("/etc").join(APP_DIR).join(CONFIG_FILENAME)
}

/// Get the default data directory.
///
/// Order of precedence:
/// 1. `$TALLY_DATA_DIR` environment variable (if set)
/// 2. `$XDG_DATA_HOME/tally` (if XDG_DATA_HOME is set)
/// 3. `~/.local/share/tally` (fallback)
pub fn default_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var(TALLY_DATA_DIR_ENV) {
        return PathBuf::from(path);
    }

    data_dir_without_env()
}

/// Get the data directory without checking TALLY_DATA_DIR env var.
/// Used for default values in configs where the env var is checked separately.
pub fn data_dir_without_env() -> PathBuf {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(data_home).join(APP_DIR);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".local")
            .join("share")
            .join(APP_DIR);
    }

    // Last resort
    PathBuf::from("/tmp").join(APP_DIR).join("data")
}

/// Expand a leading `~` to `$HOME`. Other paths are returned unchanged.
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };

    match std::env::var("HOME") {
        Ok(home) => PathBuf::from(home).join(rest),
        Err(_) => path.to_path_buf(),
    }
}

/// Resolve `path` against `base` unless it is already absolute
pub fn resolve_against(base: &Path, path: &Path) -> PathBuf {
    let path = expand_home(path);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_contains_tally() {
        let path = default_config_path();
        assert!(path.to_string_lossy().contains("tally"));
        assert!(path.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn data_dir_contains_tally() {
        let path = data_dir_without_env();
        assert!(path.to_string_lossy().contains("tally"));
    }

    #[test]
    fn relative_paths_resolve_against_base() {
        let base = Path::new("/var/lib/tally");
        assert_eq!(
            resolve_against(base, Path::new("tally.db")),
            PathBuf::from("/var/lib/tally/tally.db")
        );
        assert_eq!(
            resolve_against(base, Path::new("/srv/usage.db")),
            PathBuf::from("/srv/usage.db")
        );
    }

    #[test]
    fn non_tilde_paths_are_untouched() {
        let path = Path::new("/usr/share/applications");
        assert_eq!(expand_home(path), path.to_path_buf());
    }
}
