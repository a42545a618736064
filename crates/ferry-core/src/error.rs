//! Error types shared across the Ferry crates

use thiserror::Error;

use crate::identity::HostAddress;

/// Errors raised while reading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing setting {key}")]
    Missing { key: String },

    #[error("Setting {key} has the wrong type: expected {expected}")]
    InvalidType { key: String, expected: &'static str },

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    /// Shorthand for an out-of-range or otherwise rejected value
    pub fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by topology lookups
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("No host with address {0}")]
    UnknownHost(HostAddress),

    #[error("Host slot {0} is empty")]
    EmptySlot(HostAddress),
}

/// Result type alias for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;
