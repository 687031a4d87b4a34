//! Session error types.
//!
//! Only operator actions fail synchronously. Failures of individual checks or
//! purchase attempts are reported through events, never through these.

use thiserror::Error;

use snipe_core::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Monitoring is not running")]
    MonitoringNotRunning,

    #[error("Monitoring is already running")]
    AlreadyMonitoring,

    #[error("Purchase loop is disabled by configuration")]
    LoopDisabled,

    #[error("Session task stopped unexpectedly")]
    TaskGone,
}

pub type SessionResult<T> = Result<T, SessionError>;
