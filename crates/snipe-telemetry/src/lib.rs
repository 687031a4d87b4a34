//! Prometheus metrics, structured logging and notifiers for the sniper.
//!
//! - Prometheus metrics for checks, purchase attempts and vendor calls
//! - Structured logging with tracing (JSON in production)
//! - Event sinks: tracing mirror and Telegram notifier

pub mod error;
pub mod logging;
pub mod metrics;
pub mod sinks;
pub mod telegram;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
pub use sinks::TracingSink;
pub use telegram::{TelegramConfig, TelegramSink};
