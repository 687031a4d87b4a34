//! Purchase orchestrator.
//!
//! A single task owns [`LoopState`] and decides when `PlaceOrder` runs:
//!
//! ```text
//! Idle -> Attempting -> Succeeded
//!                    -> WaitingRetry -> Attempting
//!                    -> Stopped (attempt limit)
//! ```
//!
//! Inputs, in priority order: operator commands, poller events, attempt
//! results, the retry timer. At most one attempt is in flight and at most one
//! retry timer is pending; starting an attempt cancels any pending timer.
//!
//! # Triggers
//!
//! A transition into `Available` starts an attempt when the loop is active,
//! or a single attempt without retry when auto-checkout is on. Triggers that
//! arrive while an attempt is in flight are dropped. After a successful order
//! no trigger fires again until the loop is restarted or monitoring restarts.

use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Sleep;
use tracing::{debug, error, info, warn};

use snipe_api::{ApiResult, DynVendor};
use snipe_core::{
    AvailabilityState, EventEmitter, LogLevel, LoopPhase, LoopPolicy, LoopState, NotifyKind,
    OrderOptions, OrderRequest, OrderResult, ResourceQuery, ServerStatus,
};
use snipe_telemetry::Metrics;

use crate::error::{SessionError, SessionResult};
use crate::poller::PollerEvent;

const COMMAND_CAPACITY: usize = 16;

/// What the orchestrator buys and how it retries.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub query: Arc<ResourceQuery>,
    pub order: OrderOptions,
    pub policy: LoopPolicy,
    /// Attempt once on a transition into `Available` even without a loop.
    pub auto_checkout: bool,
}

enum Command {
    StartLoop { ack: oneshot::Sender<()> },
    StopLoop { ack: oneshot::Sender<()> },
    Shutdown { ack: oneshot::Sender<()> },
}

struct RunningOrchestrator {
    commands: mpsc::Sender<Command>,
    handle: JoinHandle<()>,
}

/// Handle to the purchase orchestrator.
///
/// The task runs while monitoring runs: [`Orchestrator::attach`] spawns it with
/// the poller's event channel, [`Orchestrator::detach`] shuts it down.
pub struct Orchestrator {
    config: Arc<OrchestratorConfig>,
    vendor: DynVendor,
    emitter: EventEmitter,
    state_tx: Arc<watch::Sender<LoopState>>,
    running: Mutex<Option<RunningOrchestrator>>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, vendor: DynVendor, emitter: EventEmitter) -> Self {
        let initial = LoopState {
            max_attempts: config.policy.max_attempts(),
            interval_seconds: config.policy.interval_secs(),
            ..Default::default()
        };
        let (state_tx, _) = watch::channel(initial);

        Self {
            config: Arc::new(config),
            vendor,
            emitter,
            state_tx: Arc::new(state_tx),
            running: Mutex::new(None),
        }
    }

    /// Spawn the task, consuming availability events from `events`.
    ///
    /// Replaces a previous task if one is still attached.
    pub async fn attach(&self, events: mpsc::Receiver<PollerEvent>) {
        let mut running = self.running.lock().await;
        if let Some(previous) = running.take() {
            shutdown(previous).await;
        }

        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (results_tx, results_rx) = mpsc::channel(1);

        let mut loop_state = self.state_tx.borrow().clone();
        loop_state.active = false;
        if loop_state.phase != LoopPhase::Succeeded {
            loop_state.phase = LoopPhase::Idle;
        }

        let actor = Actor {
            config: self.config.clone(),
            vendor: self.vendor.clone(),
            emitter: self.emitter.clone(),
            state_tx: self.state_tx.clone(),
            loop_state,
            availability: AvailabilityState::Unknown,
            status: None,
            purchased: false,
            generation: 0,
            in_flight: None,
            results_tx,
            results_rx,
            retry: None,
        };
        let handle = tokio::spawn(actor.run(commands_rx, events));

        *running = Some(RunningOrchestrator {
            commands: commands_tx,
            handle,
        });
    }

    /// Shut the task down: pending retry cancelled, in-flight attempt aborted,
    /// loop inactive. Idempotent.
    pub async fn detach(&self) {
        if let Some(running) = self.running.lock().await.take() {
            shutdown(running).await;
        }
    }

    /// Start (or restart) the purchase loop.
    ///
    /// Rejected with a warning event unless looping is enabled and monitoring
    /// is running (task attached).
    pub async fn start_loop(&self) -> SessionResult<()> {
        if !self.config.policy.enabled {
            warn!("Purchase loop start rejected: disabled by configuration");
            self.emitter.log(
                LogLevel::Warning,
                "Cannot start purchase loop: looping is not enabled in the configuration",
            );
            self.emitter.notify(
                NotifyKind::Warning,
                "Loop not enabled",
                "Enable the purchase loop in the configuration first.",
            );
            return Err(SessionError::LoopDisabled);
        }

        let running = self.running.lock().await;
        let Some(running) = running.as_ref() else {
            warn!("Purchase loop start rejected: monitoring not running");
            self.emitter.log(
                LogLevel::Warning,
                "Cannot start purchase loop: monitoring is not running",
            );
            self.emitter.notify(
                NotifyKind::Warning,
                "Monitoring not started",
                "Start server monitoring before the purchase loop.",
            );
            return Err(SessionError::MonitoringNotRunning);
        };

        let (ack, done) = oneshot::channel();
        running
            .commands
            .send(Command::StartLoop { ack })
            .await
            .map_err(|_| SessionError::TaskGone)?;
        done.await.map_err(|_| SessionError::TaskGone)
    }

    /// Stop the purchase loop. Idempotent; no attempt starts after this returns.
    pub async fn stop_loop(&self) {
        let running = self.running.lock().await;
        let Some(running) = running.as_ref() else {
            return;
        };

        let (ack, done) = oneshot::channel();
        if running.commands.send(Command::StopLoop { ack }).await.is_ok() {
            let _ = done.await;
        }
    }

    #[must_use]
    pub fn state(&self) -> LoopState {
        self.state_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LoopState> {
        self.state_tx.subscribe()
    }
}

async fn shutdown(running: RunningOrchestrator) {
    let (ack, done) = oneshot::channel();
    if running.commands.send(Command::Shutdown { ack }).await.is_ok() {
        let _ = done.await;
    }
    if let Err(e) = running.handle.await {
        error!(error = %e, "Orchestrator task ended abnormally");
    }
}

// ============================================================================
// Actor
// ============================================================================

struct InFlight {
    generation: u64,
    /// Whether the attempt belongs to the loop (failures may retry).
    looped: bool,
    handle: JoinHandle<()>,
}

type AttemptOutput = (u64, ApiResult<OrderResult>);

struct Actor {
    config: Arc<OrchestratorConfig>,
    vendor: DynVendor,
    emitter: EventEmitter,
    state_tx: Arc<watch::Sender<LoopState>>,
    loop_state: LoopState,
    /// Cached from poller events.
    availability: AvailabilityState,
    status: Option<ServerStatus>,
    /// Set after a successful order; suppresses automatic triggers.
    purchased: bool,
    generation: u64,
    in_flight: Option<InFlight>,
    results_tx: mpsc::Sender<AttemptOutput>,
    results_rx: mpsc::Receiver<AttemptOutput>,
    retry: Option<Pin<Box<Sleep>>>,
}

/// Resolves when the pending retry fires; never when there is none.
async fn retry_elapsed(retry: &mut Option<Pin<Box<Sleep>>>) {
    match retry.as_mut() {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut events: mpsc::Receiver<PollerEvent>,
    ) {
        self.publish();
        let mut events_open = true;

        loop {
            tokio::select! {
                biased;

                command = commands.recv() => {
                    match command {
                        Some(Command::StartLoop { ack }) => {
                            self.start_loop();
                            let _ = ack.send(());
                        }
                        Some(Command::StopLoop { ack }) => {
                            self.stop_loop();
                            let _ = ack.send(());
                        }
                        Some(Command::Shutdown { ack }) => {
                            self.shutdown();
                            let _ = ack.send(());
                            break;
                        }
                        None => {
                            self.shutdown();
                            break;
                        }
                    }
                }

                event = events.recv(), if events_open => {
                    match event {
                        Some(event) => self.on_poller_event(event),
                        None => events_open = false,
                    }
                }

                Some((generation, result)) = self.results_rx.recv() => {
                    self.on_attempt_result(generation, result);
                }

                () = retry_elapsed(&mut self.retry), if self.retry.is_some() => {
                    self.retry = None;
                    self.on_retry_fired();
                }
            }
        }

        debug!("Orchestrator task exited");
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.loop_state.clone());
    }

    fn plan(&self) -> &str {
        &self.config.query.plan_code
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    fn start_loop(&mut self) {
        self.retry = None;
        self.purchased = false;

        // An attempt already running (auto-checkout) counts as the loop's first.
        let adopted = match self.in_flight.as_mut() {
            Some(in_flight) => {
                in_flight.looped = true;
                true
            }
            None => false,
        };
        self.loop_state = LoopState {
            active: true,
            attempt: u32::from(adopted),
            max_attempts: self.config.policy.max_attempts(),
            interval_seconds: self.config.policy.interval_secs(),
            phase: if adopted {
                LoopPhase::Attempting
            } else {
                LoopPhase::Idle
            },
            last_result: None,
        };
        Metrics::loop_active(self.plan(), true);

        info!(
            plan = %self.config.query.plan_code,
            max_attempts = self.loop_state.max_attempts,
            interval_secs = self.loop_state.interval_seconds,
            "Purchase loop started"
        );
        self.emitter.log(LogLevel::Info, "Purchase loop started");
        self.emitter.notify(
            NotifyKind::Info,
            "Purchase loop started",
            "Will try to order whenever the server is available, until success or the attempt limit.",
        );

        if !adopted && self.availability.is_available() {
            self.begin_attempt(true);
        } else {
            self.publish();
        }
    }

    fn stop_loop(&mut self) {
        self.retry = None;
        if !self.loop_state.active {
            return;
        }

        self.loop_state.active = false;
        if self.loop_state.phase == LoopPhase::WaitingRetry {
            self.loop_state.phase = LoopPhase::Idle;
        }
        Metrics::loop_active(self.plan(), false);
        self.publish();

        info!(plan = %self.config.query.plan_code, "Purchase loop stopped");
        self.emitter.log(LogLevel::Info, "Purchase loop stopped");
        self.emitter.notify(
            NotifyKind::Warning,
            "Purchase loop stopped",
            "The purchase loop was stopped manually.",
        );
    }

    fn shutdown(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            in_flight.handle.abort();
            debug!(generation = in_flight.generation, "Aborted in-flight attempt");
        }
        // Results from before this point are stale.
        self.generation += 1;

        self.stop_loop();
        if self.loop_state.phase == LoopPhase::Attempting {
            self.loop_state.phase = LoopPhase::Idle;
        }
        self.publish();
    }

    // ------------------------------------------------------------------------
    // Poller events
    // ------------------------------------------------------------------------

    fn on_poller_event(&mut self, event: PollerEvent) {
        match event {
            PollerEvent::Observed {
                seq,
                state,
                status,
                became_available,
            } => {
                self.availability = state;
                if status.is_some() {
                    self.status = status;
                }
                if became_available {
                    debug!(seq, "Availability transition received");
                    self.on_available();
                }
            }
            PollerEvent::Reset => {
                self.availability = AvailabilityState::Unknown;
            }
        }
    }

    fn on_available(&mut self) {
        if self.purchased {
            debug!("Already purchased, trigger ignored");
            return;
        }
        if self.in_flight.is_some() {
            debug!("Attempt in flight, trigger dropped");
            return;
        }

        if self.loop_state.active {
            self.begin_attempt(true);
        } else if self.config.auto_checkout {
            self.begin_attempt(false);
        }
    }

    // ------------------------------------------------------------------------
    // Attempts
    // ------------------------------------------------------------------------

    fn begin_attempt(&mut self, looped: bool) {
        self.retry = None;

        let order = match &self.status {
            Some(status) => {
                OrderRequest::from_query(&self.config.query, &self.config.order).for_status(status)
            }
            None => OrderRequest::from_query(&self.config.query, &self.config.order),
        };

        if looped {
            self.loop_state.attempt += 1;
        }
        self.loop_state.phase = LoopPhase::Attempting;
        self.publish();

        let (fqn, datacenter) = match &self.status {
            Some(s) => (s.fqn.clone(), s.datacenter.clone()),
            None => (
                order.plan_code.clone(),
                order.datacenter.clone().unwrap_or_default(),
            ),
        };
        info!(
            plan = %order.plan_code,
            zone = %order.zone,
            datacenter = %datacenter,
            attempt = self.loop_state.attempt,
            looped,
            "Purchase attempt started"
        );
        let attempt_note = if looped {
            format!(" (attempt #{})", self.loop_state.attempt)
        } else {
            String::new()
        };
        self.emitter.log(
            LogLevel::Info,
            format!("Attempting to purchase server {fqn} in {datacenter}{attempt_note}"),
        );
        self.emitter.notify(
            NotifyKind::Info,
            "Purchase started",
            format!("Attempting to purchase server {fqn} in {datacenter}"),
        );

        self.generation += 1;
        let generation = self.generation;
        let vendor = self.vendor.clone();
        let results = self.results_tx.clone();
        let handle = tokio::spawn(async move {
            let result = vendor.place_order(&order).await;
            let _ = results.send((generation, result)).await;
        });

        self.in_flight = Some(InFlight {
            generation,
            looped,
            handle,
        });
    }

    fn on_attempt_result(&mut self, generation: u64, result: ApiResult<OrderResult>) {
        let looped = match &self.in_flight {
            Some(in_flight) if in_flight.generation == generation => in_flight.looped,
            _ => {
                debug!(generation, "Discarding stale attempt result");
                return;
            }
        };
        self.in_flight = None;

        let result = match result {
            Ok(result) => result,
            Err(e) => OrderResult::failed(e.to_string()),
        };
        Metrics::purchase_attempt(self.plan(), result.success);
        self.loop_state.last_result = Some(result.clone());

        if result.success {
            self.on_success(&result);
        } else {
            self.on_failure(&result, looped);
        }
        self.publish();
    }

    fn on_success(&mut self, result: &OrderResult) {
        self.retry = None;
        self.purchased = true;
        self.loop_state.active = false;
        self.loop_state.phase = LoopPhase::Succeeded;
        Metrics::loop_active(self.plan(), false);

        let order_id = result.order_id.as_deref().unwrap_or("unknown");
        info!(order_id, url = ?result.order_url, "Order placed");
        self.emitter.log(
            LogLevel::Success,
            format!("Order placed! Order ID: {order_id}"),
        );
        let message = match &result.order_url {
            Some(url) => format!("Server ordered successfully. Order ID: {order_id} ({url})"),
            None => format!("Server ordered successfully. Order ID: {order_id}"),
        };
        self.emitter
            .notify(NotifyKind::Success, "Purchase succeeded!", message);
    }

    fn on_failure(&mut self, result: &OrderResult, looped: bool) {
        let reason = result.error.as_deref().unwrap_or("unknown error");
        warn!(reason, attempt = self.loop_state.attempt, "Purchase attempt failed");
        self.emitter
            .log(LogLevel::Error, format!("Purchase failed: {reason}"));
        self.emitter
            .notify(NotifyKind::Error, "Purchase failed", reason.to_string());

        if !(looped && self.loop_state.active) {
            self.loop_state.phase = LoopPhase::Idle;
            return;
        }

        let policy = &self.config.policy;
        if policy.limit_reached(self.loop_state.attempt) {
            self.loop_state.active = false;
            self.loop_state.phase = LoopPhase::Stopped;
            Metrics::loop_active(self.plan(), false);

            let max = policy.max_attempts();
            info!(max_attempts = max, "Attempt limit reached, purchase loop stopped");
            self.emitter.log(
                LogLevel::Warning,
                format!("Maximum attempts reached ({max}), purchase loop stopped"),
            );
            self.emitter.notify(
                NotifyKind::Warning,
                "Loop stopped",
                format!("Maximum number of attempts reached ({max})."),
            );
            return;
        }

        let interval = policy.interval();
        self.retry = Some(Box::pin(tokio::time::sleep(interval)));
        self.loop_state.phase = LoopPhase::WaitingRetry;
        self.emitter.log(
            LogLevel::Info,
            format!(
                "Next attempt (#{}) scheduled in {} seconds",
                self.loop_state.attempt + 1,
                interval.as_secs()
            ),
        );
    }

    fn on_retry_fired(&mut self) {
        if !self.loop_state.active {
            return;
        }
        if !self.availability.is_available() {
            debug!(availability = %self.availability, "Retry skipped, server not available");
            self.emitter.log(
                LogLevel::Info,
                "Retry skipped: server no longer available, waiting for availability",
            );
            self.loop_state.phase = LoopPhase::Idle;
            self.publish();
            return;
        }
        if self.in_flight.is_some() {
            return;
        }

        self.emitter.log(
            LogLevel::Info,
            format!("Running purchase attempt #{}", self.loop_state.attempt + 1),
        );
        self.begin_attempt(true);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use snipe_api::{ApiError, MockVendor};
    use snipe_core::MemorySink;

    use super::*;

    struct Harness {
        vendor: Arc<MockVendor>,
        sink: Arc<MemorySink>,
        orchestrator: Orchestrator,
        events: mpsc::Sender<PollerEvent>,
        seq: u64,
    }

    impl Harness {
        async fn new(policy: LoopPolicy, auto_checkout: bool) -> Self {
            let vendor = Arc::new(MockVendor::new());
            let emitter = EventEmitter::new();
            let sink = Arc::new(MemorySink::new());
            emitter.add_sink(sink.clone());

            let config = OrchestratorConfig {
                query: Arc::new(ResourceQuery::new("25skmystery01", "FR").with_datacenter("rbx")),
                order: OrderOptions::default(),
                policy,
                auto_checkout,
            };
            let orchestrator = Orchestrator::new(config, vendor.clone(), emitter);
            let (events, events_rx) = mpsc::channel(64);
            orchestrator.attach(events_rx).await;

            Self {
                vendor,
                sink,
                orchestrator,
                events,
                seq: 0,
            }
        }

        async fn observe(&mut self, availability: &str, became_available: bool) {
            self.seq += 1;
            let status = MockVendor::status("rbx", availability).remove(0);
            self.events
                .send(PollerEvent::Observed {
                    seq: self.seq,
                    state: status.state(),
                    status: Some(status),
                    became_available,
                })
                .await
                .unwrap();
            settle().await;
        }
    }

    /// Let spawned tasks run to their next suspension point.
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    fn looping(interval: u64, max: u32) -> LoopPolicy {
        LoopPolicy::new(true, interval, max).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_rejected_when_detached() {
        let h = Harness::new(looping(10, 0), false).await;
        h.orchestrator.detach().await;

        assert_eq!(
            h.orchestrator.start_loop().await,
            Err(SessionError::MonitoringNotRunning)
        );
        assert!(!h.orchestrator.state().active);
        assert_eq!(h.sink.logs(LogLevel::Warning).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_rejected_when_disabled() {
        let h = Harness::new(LoopPolicy::disabled(), false).await;
        assert_eq!(h.orchestrator.start_loop().await, Err(SessionError::LoopDisabled));
        assert!(!h.orchestrator.state().active);
        assert_eq!(
            h.sink.notifications(NotifyKind::Warning),
            vec!["Loop not enabled"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_failures_stop_bounded_loop() {
        let mut h = Harness::new(looping(10, 3), false).await;
        h.vendor.set_default_order(Ok(OrderResult::failed("out of stock")));

        h.observe("available", true).await;
        h.orchestrator.start_loop().await.unwrap();
        settle().await;

        tokio::time::sleep(Duration::from_secs(120)).await;
        settle().await;

        assert_eq!(h.vendor.order_count(), 3);
        let state = h.orchestrator.state();
        assert!(!state.active);
        assert_eq!(state.attempt, 3);
        assert_eq!(state.phase, LoopPhase::Stopped);
        assert_eq!(h.sink.notifications(NotifyKind::Warning), vec!["Loop stopped"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_loop_keeps_retrying() {
        let mut h = Harness::new(looping(10, 0), false).await;
        h.vendor.set_default_order(Err(ApiError::Vendor {
            status: 409,
            message: "not available".to_string(),
        }));

        h.observe("available", true).await;
        h.orchestrator.start_loop().await.unwrap();
        settle().await;

        tokio::time::sleep(Duration::from_secs(95)).await;
        settle().await;

        // t=0 plus one per 10 s.
        assert_eq!(h.vendor.order_count(), 10);
        let state = h.orchestrator.state();
        assert!(state.active);
        assert_eq!(state.phase, LoopPhase::WaitingRetry);
        assert!(!state.last_result.unwrap().success);

        h.orchestrator.stop_loop().await;
        assert!(!h.orchestrator.state().active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_started_during_auto_attempt_keeps_retrying() {
        let mut h = Harness::new(looping(10, 0), true).await;
        h.vendor.set_order_delay(Duration::from_secs(5));
        h.vendor.set_default_order(Ok(OrderResult::failed("out of stock")));

        h.observe("available", true).await;
        assert_eq!(h.vendor.order_count(), 1);

        h.orchestrator.start_loop().await.unwrap();
        settle().await;
        let state = h.orchestrator.state();
        assert!(state.active);
        assert_eq!(state.attempt, 1);
        assert_eq!(state.phase, LoopPhase::Attempting);
        assert_eq!(h.vendor.order_count(), 1);

        for _ in 0..8 {
            tokio::time::sleep(Duration::from_secs(60)).await;
            h.observe("available", false).await;
        }

        // 5 s per attempt plus a 10 s wait: one new order every 15 s.
        let state = h.orchestrator.state();
        assert!(state.active);
        assert!(h.vendor.order_count() >= 30);
        assert_eq!(state.attempt as usize, h.vendor.order_count());

        h.orchestrator.stop_loop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_pending_retry() {
        let mut h = Harness::new(looping(10, 0), false).await;
        h.vendor.set_default_order(Ok(OrderResult::failed("out of stock")));

        h.observe("available", true).await;
        h.orchestrator.start_loop().await.unwrap();
        settle().await;
        assert_eq!(h.orchestrator.state().phase, LoopPhase::WaitingRetry);

        h.orchestrator.stop_loop().await;
        let orders = h.vendor.order_count();

        tokio::time::sleep(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(h.vendor.order_count(), orders);
        assert_eq!(h.orchestrator.state().phase, LoopPhase::Idle);

        // Idempotent.
        h.orchestrator.stop_loop().await;
        assert_eq!(
            h.sink.notifications(NotifyKind::Warning),
            vec!["Purchase loop stopped"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_stops_loop_and_latches() {
        let mut h = Harness::new(looping(10, 0), true).await;
        h.vendor.push_order(Ok(OrderResult::failed("busy")));
        h.vendor.push_order(Ok(OrderResult::succeeded(
            Some("123".to_string()),
            Some("https://order/123".to_string()),
        )));

        h.orchestrator.start_loop().await.unwrap();
        assert_eq!(h.vendor.order_count(), 0);

        h.observe("available", true).await;
        tokio::time::sleep(Duration::from_secs(11)).await;
        settle().await;

        let state = h.orchestrator.state();
        assert_eq!(state.phase, LoopPhase::Succeeded);
        assert!(!state.active);
        assert_eq!(state.attempt, 2);
        assert_eq!(state.last_result.unwrap().order_id.as_deref(), Some("123"));

        // Flapping availability must not buy again, even with auto-checkout.
        h.observe("unavailable", false).await;
        h.observe("available", true).await;
        assert_eq!(h.vendor.order_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_skipped_when_no_longer_available() {
        let mut h = Harness::new(looping(10, 0), false).await;
        h.vendor.set_default_order(Ok(OrderResult::failed("out of stock")));

        h.observe("available", true).await;
        h.orchestrator.start_loop().await.unwrap();
        settle().await;
        h.observe("unavailable", false).await;

        tokio::time::sleep(Duration::from_secs(30)).await;
        settle().await;

        assert_eq!(h.vendor.order_count(), 1);
        let state = h.orchestrator.state();
        assert!(state.active);
        assert_eq!(state.phase, LoopPhase::Idle);

        // The next transition resumes the loop.
        h.observe("available", true).await;
        assert_eq!(h.vendor.order_count(), 2);
        assert_eq!(h.orchestrator.state().attempt, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_checkout_single_attempt_without_retry() {
        let mut h = Harness::new(LoopPolicy::disabled(), true).await;
        h.vendor.set_default_order(Ok(OrderResult::failed("out of stock")));

        h.observe("available", true).await;
        tokio::time::sleep(Duration::from_secs(300)).await;
        settle().await;

        assert_eq!(h.vendor.order_count(), 1);
        let state = h.orchestrator.state();
        assert!(!state.active);
        assert_eq!(state.attempt, 0);
        assert_eq!(state.phase, LoopPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_dropped_while_in_flight() {
        let mut h = Harness::new(LoopPolicy::disabled(), true).await;
        h.vendor.set_order_delay(Duration::from_secs(20));

        h.observe("available", true).await;
        h.observe("unknown", false).await;
        h.observe("available", true).await;

        tokio::time::sleep(Duration::from_secs(25)).await;
        settle().await;
        assert_eq!(h.vendor.order_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_order_uses_reported_datacenter() {
        let vendor = Arc::new(MockVendor::new());
        let config = OrchestratorConfig {
            query: Arc::new(ResourceQuery::new("25skmystery01", "FR")),
            order: OrderOptions::default(),
            policy: LoopPolicy::disabled(),
            auto_checkout: true,
        };
        let orchestrator = Orchestrator::new(config, vendor.clone(), EventEmitter::new());
        let (events, events_rx) = mpsc::channel(8);
        orchestrator.attach(events_rx).await;

        let status = MockVendor::status("gra", "available").remove(0);
        events
            .send(PollerEvent::Observed {
                seq: 1,
                state: AvailabilityState::Available,
                status: Some(status),
                became_available: true,
            })
            .await
            .unwrap();
        settle().await;

        let calls = vendor.order_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].order.datacenter.as_deref(), Some("gra"));
        orchestrator.detach().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_detach_aborts_in_flight_attempt() {
        let mut h = Harness::new(looping(10, 0), false).await;
        h.vendor.set_order_delay(Duration::from_secs(20));

        h.observe("available", true).await;
        h.orchestrator.start_loop().await.unwrap();
        settle().await;
        assert_eq!(h.orchestrator.state().phase, LoopPhase::Attempting);

        h.orchestrator.detach().await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        let state = h.orchestrator.state();
        assert!(!state.active);
        assert_eq!(state.phase, LoopPhase::Idle);
        assert!(state.last_result.is_none());
        assert_eq!(h.vendor.order_count(), 1);
    }
}
