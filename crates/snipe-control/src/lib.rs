//! HTTP control surface for a monitoring session.
//!
//! Exposes status, start/stop of monitoring and the purchase loop, Prometheus
//! metrics and a WebSocket event stream. Disabled unless configured.

pub mod config;
pub mod error;
pub mod server;
pub mod types;

pub use config::ControlConfig;
pub use error::{ControlError, ControlResult};
pub use server::{create_router, run_server, serve, AppState, ConnectionLimiter};
pub use types::{ActionResponse, ErrorResponse, HealthResponse, StreamMessage};
