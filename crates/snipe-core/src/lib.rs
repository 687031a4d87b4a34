//! Core domain types for the dedicated-server sniper.
//!
//! This crate provides the vocabulary shared by every other crate:
//! - `ResourceQuery`: the plan/zone/datacenter being watched
//! - `AvailabilityState`, `ServerStatus`: inventory observations
//! - `Credentials`: vendor API keys (redacted in `Debug`, zeroized on drop)
//! - `OrderRequest`, `OrderResult`, `LoopState`: purchase model
//! - `Event`, `EventEmitter`, `EventSink`: the outbound event stream

pub mod error;
pub mod event;
pub mod policy;
pub mod types;

pub use error::{ConfigError, ConfigResult};
pub use event::{Event, EventEmitter, EventRecord, EventSink, LogLevel, MemorySink, NotifyKind};
pub use policy::{LoopPolicy, MIN_LOOP_INTERVAL_SECS};
pub use types::{
    AvailabilityState, Credentials, LoopPhase, LoopState, OrderOptions, OrderRequest,
    OrderResult, ResourceQuery, ServerStatus,
};
