//! Error types for snipe-core.

use thiserror::Error;

/// Configuration errors.
///
/// These are the only errors that reach an operator synchronously: everything
/// that happens after monitoring has started is reported through events.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Missing vendor API credentials (application_key, application_secret, consumer_key)")]
    MissingCredentials,

    #[error("Loop interval {secs}s is below the minimum of {min}s")]
    IntervalTooShort { secs: u64, min: u64 },

    #[error("Unknown API endpoint: {0}")]
    UnknownEndpoint(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type alias for configuration checks.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
