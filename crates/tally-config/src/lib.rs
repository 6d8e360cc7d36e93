//! Configuration parsing and validation for tally
//!
//! Supports TOML configuration with:
//! - Versioned schema
//! - Poll interval, data directory and identity overrides
//! - Retry and inventory settings
//! - Validation that reports every error at once

mod schema;
mod settings;
mod validation;

pub use schema::*;
pub use settings::*;
pub use validation::*;

use std::path::Path;
use thiserror::Error;
use tracing::info;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation failed: {errors:?}")]
    ValidationFailed { errors: Vec<ValidationError> },

    #[error("Unsupported config version: {0}")]
    UnsupportedVersion(u32),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Load and validate configuration from a TOML file
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<AgentConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Load the config at `path` if it exists, otherwise fall back to defaults.
///
/// Only meant for the implicit default location: an explicitly requested file
/// that is missing should go through [`load_config`] and fail.
pub fn load_config_or_default(path: impl AsRef<Path>) -> ConfigResult<AgentConfig> {
    let path = path.as_ref();
    if path.exists() {
        load_config(path)
    } else {
        info!(config_path = %path.display(), "No config file, using defaults");
        Ok(AgentConfig::default())
    }
}

/// Parse and validate configuration from a TOML string
pub fn parse_config(content: &str) -> ConfigResult<AgentConfig> {
    let raw: RawConfig = toml::from_str(content)?;

    if raw.config_version != CURRENT_CONFIG_VERSION {
        return Err(ConfigError::UnsupportedVersion(raw.config_version));
    }

    let errors = validate_config(&raw);
    if !errors.is_empty() {
        return Err(ConfigError::ValidationFailed { errors });
    }

    Ok(AgentConfig::from_raw(raw))
}

/// Current supported config version
pub const CURRENT_CONFIG_VERSION: u32 = 1;
