//! Dedicated-server availability sniper.
//!
//! Wires the signed vendor client, a monitoring session, the notifiers and
//! the control server into one process.

pub mod app;
pub mod config;
pub mod error;

pub use app::Application;
pub use crate::config::AppConfig;
pub use error::{AppError, AppResult};
