//! Vendor API error types.

use thiserror::Error;

use snipe_core::ConfigError;

use crate::signer::SignerError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// Network failure, TLS failure or timeout.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Non-2xx response.
    #[error("Vendor error (HTTP {status}): {message}")]
    Vendor { status: u16, message: String },

    /// 2xx response with an unexpected shape.
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Signer(#[from] SignerError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ApiError {
    /// Short label used for metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Vendor { .. } => "vendor",
            Self::Protocol(_) => "protocol",
            Self::Signer(_) => "signer",
            Self::Config(_) => "config",
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
