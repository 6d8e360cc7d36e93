//! Configuration validation

use crate::schema::RawConfig;
use thiserror::Error;

/// Longest poll interval accepted (one day)
pub const MAX_POLL_INTERVAL_SECS: u64 = 86_400;

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("{field}: {message}")]
    InvalidValue { field: &'static str, message: String },

    #[error("{0} cannot be empty")]
    EmptyValue(&'static str),
}

/// Validate a raw configuration, collecting every problem
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if let Some(secs) = config.agent.poll_interval_seconds
        && (secs == 0 || secs > MAX_POLL_INTERVAL_SECS)
    {
        errors.push(ValidationError::InvalidValue {
            field: "agent.poll_interval_seconds",
            message: format!("must be between 1 and {}, got {}", MAX_POLL_INTERVAL_SECS, secs),
        });
    }

    if let Some(database) = &config.agent.database
        && database.as_os_str().is_empty()
    {
        errors.push(ValidationError::EmptyValue("agent.database"));
    }

    if let Some(user) = &config.agent.user
        && user.trim().is_empty()
    {
        errors.push(ValidationError::EmptyValue("agent.user"));
    }

    if let Some(machine) = &config.agent.machine
        && machine.trim().is_empty()
    {
        errors.push(ValidationError::EmptyValue("agent.machine"));
    }

    if config.retry.max_attempts == Some(0) {
        errors.push(ValidationError::InvalidValue {
            field: "retry.max_attempts",
            message: "must be at least 1".into(),
        });
    }

    if config.retry.queue_capacity == Some(0) {
        errors.push(ValidationError::InvalidValue {
            field: "retry.queue_capacity",
            message: "must be at least 1".into(),
        });
    }

    if let Some(dirs) = &config.inventory.desktop_dirs
        && dirs.iter().any(|d| d.as_os_str().is_empty())
    {
        errors.push(ValidationError::EmptyValue("inventory.desktop_dirs entry"));
    }

    errors
}
