//! Acquisition orchestration for the dedicated-server sniper.
//!
//! # Key Components
//!
//! - [`Poller`]: checks availability now and every 60 s, owns `AvailabilityState`
//! - [`Orchestrator`]: purchase state machine, owns `LoopState`
//! - [`Session`]: wires both for one watched resource
//!
//! The poller reports to the orchestrator over an mpsc channel of
//! [`PollerEvent`]s; everyone else observes through `watch` snapshots.

pub mod error;
pub mod orchestrator;
pub mod poller;
pub mod session;

pub use error::{SessionError, SessionResult};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use poller::{AvailabilitySnapshot, Poller, PollerEvent, POLL_INTERVAL};
pub use session::{Session, SessionConfig, SessionStatus};
