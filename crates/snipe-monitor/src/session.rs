//! Monitoring session: one watched resource, one poller, one orchestrator.
//!
//! Sessions share no mutable state, so several resources can be watched by
//! creating several sessions over the same vendor client.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::info;

use snipe_api::DynVendor;
use snipe_core::{
    AvailabilityState, EventEmitter, LogLevel, LoopPolicy, LoopState, NotifyKind, OrderOptions,
    ResourceQuery,
};

use crate::error::{SessionError, SessionResult};
use crate::orchestrator::{Orchestrator, OrchestratorConfig};
use crate::poller::{AvailabilitySnapshot, Poller};

/// Capacity of the poller -> orchestrator channel.
const EVENT_CAPACITY: usize = 64;

/// Everything a session needs to know about what to buy.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub query: ResourceQuery,
    pub order: OrderOptions,
    pub policy: LoopPolicy,
    pub auto_checkout: bool,
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub query: ResourceQuery,
    pub monitoring: bool,
    pub auto_checkout: bool,
    pub loop_enabled: bool,
    pub availability: AvailabilitySnapshot,
    pub purchase_loop: LoopState,
}

pub struct Session {
    query: Arc<ResourceQuery>,
    auto_checkout: bool,
    loop_enabled: bool,
    emitter: EventEmitter,
    poller: Poller,
    orchestrator: Orchestrator,
    /// Serializes start/stop of monitoring.
    lifecycle: Mutex<()>,
}

impl Session {
    pub fn new(config: SessionConfig, vendor: DynVendor, emitter: EventEmitter) -> Self {
        let query = Arc::new(config.query);
        let poller = Poller::new(query.clone(), vendor.clone(), emitter.clone());
        let orchestrator = Orchestrator::new(
            OrchestratorConfig {
                query: query.clone(),
                order: config.order,
                policy: config.policy,
                auto_checkout: config.auto_checkout,
            },
            vendor,
            emitter.clone(),
        );

        Self {
            query,
            auto_checkout: config.auto_checkout,
            loop_enabled: config.policy.enabled,
            emitter,
            poller,
            orchestrator,
            lifecycle: Mutex::new(()),
        }
    }

    /// Start watching the resource. The first check runs immediately.
    pub async fn start_monitoring(&self) -> SessionResult<()> {
        let _guard = self.lifecycle.lock().await;

        if let Err(e) = self.query.validate() {
            self.emitter
                .log(LogLevel::Error, format!("Cannot start monitoring: {e}"));
            self.emitter.notify(
                NotifyKind::Error,
                "Configuration error",
                "A plan code and zone are required to start monitoring.",
            );
            return Err(e.into());
        }
        if self.poller.is_running().await {
            return Err(SessionError::AlreadyMonitoring);
        }

        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        self.orchestrator.attach(events_rx).await;
        if let Err(e) = self.poller.start(events_tx).await {
            self.orchestrator.detach().await;
            return Err(e);
        }

        info!(query = %self.query, "Monitoring started");
        self.emitter.log(LogLevel::Info, "Monitoring started");
        self.emitter.notify(
            NotifyKind::Info,
            "Monitoring started",
            format!("Watching availability of {}.", self.query),
        );
        Ok(())
    }

    /// Stop watching. Also stops any active purchase loop. Idempotent.
    pub async fn stop_monitoring(&self) {
        let _guard = self.lifecycle.lock().await;

        if !self.poller.is_running().await {
            return;
        }
        self.poller.stop().await;
        self.orchestrator.detach().await;

        info!(query = %self.query, "Monitoring stopped");
        self.emitter.log(LogLevel::Info, "Monitoring stopped");
        self.emitter.notify(
            NotifyKind::Warning,
            "Monitoring stopped",
            "Server availability monitoring has been deactivated.",
        );
    }

    /// Start the purchase loop. Requires running monitoring and an enabled loop.
    pub async fn start_loop(&self) -> SessionResult<()> {
        self.orchestrator.start_loop().await
    }

    pub async fn stop_loop(&self) {
        self.orchestrator.stop_loop().await;
    }

    pub async fn is_monitoring(&self) -> bool {
        self.poller.is_running().await
    }

    #[must_use]
    pub fn availability(&self) -> AvailabilityState {
        self.poller.state()
    }

    #[must_use]
    pub fn loop_state(&self) -> LoopState {
        self.orchestrator.state()
    }

    pub fn subscribe_availability(&self) -> watch::Receiver<AvailabilitySnapshot> {
        self.poller.subscribe()
    }

    pub fn subscribe_loop(&self) -> watch::Receiver<LoopState> {
        self.orchestrator.subscribe()
    }

    #[must_use]
    pub fn emitter(&self) -> &EventEmitter {
        &self.emitter
    }

    #[must_use]
    pub fn query(&self) -> &ResourceQuery {
        &self.query
    }

    pub async fn status(&self) -> SessionStatus {
        SessionStatus {
            query: (*self.query).clone(),
            monitoring: self.is_monitoring().await,
            auto_checkout: self.auto_checkout,
            loop_enabled: self.loop_enabled,
            availability: self.poller.snapshot(),
            purchase_loop: self.orchestrator.state(),
        }
    }
}
