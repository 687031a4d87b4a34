//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Invalid(#[from] snipe_core::ConfigError),

    #[error("Vendor API error: {0}")]
    Api(#[from] snipe_api::ApiError),

    #[error("Session error: {0}")]
    Session(#[from] snipe_monitor::SessionError),

    #[error("Control server error: {0}")]
    Control(#[from] snipe_control::ControlError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] snipe_telemetry::TelemetryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
