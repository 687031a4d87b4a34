//! Availability poller.
//!
//! One background task per monitoring run. It owns the availability state,
//! checks the vendor immediately and then every [`POLL_INTERVAL`], and reports
//! every applied result to the orchestrator.
//!
//! # Ordering
//!
//! Each tick gets a sequence number. Checks run concurrently with the timer,
//! so a slow check can finish after a newer one; a result whose sequence is
//! not newer than the last applied one is discarded.
//!
//! # Stop
//!
//! [`Poller::stop`] returns only after the task has exited: no tick fires
//! afterwards, in-flight checks are aborted and the state is back to `Unknown`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use snipe_api::{ApiResult, DynVendor};
use snipe_core::{
    AvailabilityState, EventEmitter, LogLevel, NotifyKind, ResourceQuery, ServerStatus,
};
use snipe_telemetry::Metrics;

use crate::error::{SessionError, SessionResult};

/// Time between two availability checks.
pub const POLL_INTERVAL: Duration = Duration::from_secs(60);

/// What the poller tells the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollerEvent {
    /// A check result was applied.
    Observed {
        seq: u64,
        state: AvailabilityState,
        status: Option<ServerStatus>,
        /// True when `state` is `Available` and the previous settled state was not.
        became_available: bool,
    },
    /// Monitoring stopped and the state was reset to `Unknown`.
    Reset,
}

/// Read-only view of the poller state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AvailabilitySnapshot {
    pub state: AvailabilityState,
    /// Last inventory entry that matched the query.
    pub status: Option<ServerStatus>,
    pub checked_at: Option<DateTime<Utc>>,
    /// Sequence number of the last applied check.
    pub seq: u64,
}

struct RunningPoller {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Handle to the availability poller.
pub struct Poller {
    query: Arc<ResourceQuery>,
    vendor: DynVendor,
    emitter: EventEmitter,
    snapshot_tx: Arc<watch::Sender<AvailabilitySnapshot>>,
    running: Mutex<Option<RunningPoller>>,
}

impl Poller {
    pub fn new(query: Arc<ResourceQuery>, vendor: DynVendor, emitter: EventEmitter) -> Self {
        let (snapshot_tx, _) = watch::channel(AvailabilitySnapshot::default());
        Self {
            query,
            vendor,
            emitter,
            snapshot_tx: Arc::new(snapshot_tx),
            running: Mutex::new(None),
        }
    }

    /// Start polling. The first check runs immediately.
    pub async fn start(&self, events_tx: mpsc::Sender<PollerEvent>) -> SessionResult<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(SessionError::AlreadyMonitoring);
        }

        let cancel = CancellationToken::new();
        let task = PollerTask {
            query: self.query.clone(),
            vendor: self.vendor.clone(),
            emitter: self.emitter.clone(),
            snapshot_tx: self.snapshot_tx.clone(),
            events_tx,
            cancel: cancel.clone(),
            applied_seq: 0,
            last_settled: AvailabilityState::Unknown,
        };
        let handle = tokio::spawn(task.run());

        *running = Some(RunningPoller { cancel, handle });
        info!(query = %self.query, "Poller started");
        Ok(())
    }

    /// Stop polling and wait for the task to exit. Idempotent.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };

        running.cancel.cancel();
        if let Err(e) = running.handle.await {
            error!(error = %e, "Poller task ended abnormally");
            self.snapshot_tx.send_modify(|s| s.state = AvailabilityState::Unknown);
        }
        info!(query = %self.query, "Poller stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    #[must_use]
    pub fn snapshot(&self) -> AvailabilitySnapshot {
        self.snapshot_tx.borrow().clone()
    }

    #[must_use]
    pub fn state(&self) -> AvailabilityState {
        self.snapshot_tx.borrow().state
    }

    pub fn subscribe(&self) -> watch::Receiver<AvailabilitySnapshot> {
        self.snapshot_tx.subscribe()
    }
}

// ============================================================================
// Task
// ============================================================================

type CheckOutput = (u64, ApiResult<Vec<ServerStatus>>);

struct PollerTask {
    query: Arc<ResourceQuery>,
    vendor: DynVendor,
    emitter: EventEmitter,
    snapshot_tx: Arc<watch::Sender<AvailabilitySnapshot>>,
    events_tx: mpsc::Sender<PollerEvent>,
    cancel: CancellationToken,
    applied_seq: u64,
    /// Last state produced by a finished check (never `Checking`).
    last_settled: AvailabilityState,
}

impl PollerTask {
    async fn run(mut self) {
        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut checks: JoinSet<CheckOutput> = JoinSet::new();
        let mut next_seq: u64 = 0;

        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    debug!("Poller cancelled");
                    break;
                }

                _ = ticker.tick() => {
                    next_seq += 1;
                    self.begin_check(next_seq, &mut checks);
                }

                Some(joined) = checks.join_next() => {
                    match joined {
                        Ok((seq, result)) => self.apply(seq, result).await,
                        Err(e) => error!(error = %e, "Availability check task failed"),
                    }
                }
            }
        }

        checks.abort_all();
        self.reset().await;
    }

    fn begin_check(&self, seq: u64, checks: &mut JoinSet<CheckOutput>) {
        self.snapshot_tx
            .send_modify(|s| s.state = AvailabilityState::Checking);
        Metrics::availability_set(&self.query.plan_code, AvailabilityState::Checking);

        self.emitter.log(
            LogLevel::Info,
            format!("Checking availability of {}", self.query.plan_code),
        );
        debug!(seq, query = %self.query, "Availability check started");

        let vendor = self.vendor.clone();
        let query = self.query.clone();
        checks.spawn(async move { (seq, vendor.check_availability(&query).await) });
    }

    async fn apply(&mut self, seq: u64, result: ApiResult<Vec<ServerStatus>>) {
        if seq <= self.applied_seq {
            debug!(seq, applied = self.applied_seq, "Discarding stale availability result");
            return;
        }
        self.applied_seq = seq;

        let plan = self.query.plan_code.as_str();
        let (state, status) = match result {
            Ok(entries) => match self.query.select(&entries) {
                Some(status) => {
                    let state = status.state();
                    Metrics::check_completed(plan, &state.to_string());
                    (state, Some(status.clone()))
                }
                None => {
                    Metrics::check_completed(plan, "no_data");
                    warn!(seq, query = %self.query, "No availability data returned");
                    self.emitter.log(
                        LogLevel::Warning,
                        format!("No availability data found for plan {}", self.query),
                    );
                    (AvailabilityState::Unknown, None)
                }
            },
            Err(e) => {
                Metrics::check_completed(plan, "error");
                warn!(seq, error = %e, "Availability check failed");
                self.emitter.log(
                    LogLevel::Error,
                    format!("Error checking availability: {e}"),
                );
                self.emitter.notify(
                    NotifyKind::Error,
                    "Monitoring error",
                    "Failed to check server availability.",
                );
                (AvailabilityState::Unknown, None)
            }
        };

        let became_available =
            state.is_available() && self.last_settled != AvailabilityState::Available;
        self.last_settled = state;

        if let Some(status) = &status {
            if became_available {
                self.emitter.log(
                    LogLevel::Success,
                    format!("Server {} is available in {}!", status.fqn, status.datacenter),
                );
                self.emitter.notify(
                    NotifyKind::Success,
                    "Server available!",
                    format!(
                        "Server {} is available in datacenter {}.",
                        status.fqn, status.datacenter
                    ),
                );
            } else if state.is_available() {
                self.emitter.log(
                    LogLevel::Info,
                    format!("Server {} is still available in {}", status.fqn, status.datacenter),
                );
            } else {
                self.emitter.log(
                    LogLevel::Info,
                    format!(
                        "Server {} is currently unavailable in {}",
                        status.fqn, status.datacenter
                    ),
                );
            }
        }

        self.snapshot_tx.send_modify(|s| {
            s.state = state;
            if status.is_some() {
                s.status = status.clone();
            }
            s.checked_at = Some(Utc::now());
            s.seq = seq;
        });
        Metrics::availability_set(plan, state);

        let event = PollerEvent::Observed {
            seq,
            state,
            status,
            became_available,
        };
        if self.events_tx.send(event).await.is_err() {
            debug!("Orchestrator gone, availability event dropped");
        }
    }

    async fn reset(&mut self) {
        self.last_settled = AvailabilityState::Unknown;
        self.snapshot_tx
            .send_modify(|s| s.state = AvailabilityState::Unknown);
        Metrics::availability_set(&self.query.plan_code, AvailabilityState::Unknown);
        let _ = self.events_tx.send(PollerEvent::Reset).await;
    }
}

#[cfg(test)]
mod tests {
    use snipe_api::{ApiError, MockVendor};
    use snipe_core::MemorySink;

    use super::*;

    struct Harness {
        vendor: Arc<MockVendor>,
        sink: Arc<MemorySink>,
        poller: Poller,
        events_rx: mpsc::Receiver<PollerEvent>,
        events_tx: mpsc::Sender<PollerEvent>,
    }

    fn harness(query: ResourceQuery) -> Harness {
        let vendor = Arc::new(MockVendor::new());
        let emitter = EventEmitter::new();
        let sink = Arc::new(MemorySink::new());
        emitter.add_sink(sink.clone());
        let (events_tx, events_rx) = mpsc::channel(64);

        let poller = Poller::new(Arc::new(query), vendor.clone(), emitter);
        Harness {
            vendor,
            sink,
            poller,
            events_rx,
            events_tx,
        }
    }

    async fn next_observed(rx: &mut mpsc::Receiver<PollerEvent>) -> (u64, AvailabilityState, bool) {
        match rx.recv().await {
            Some(PollerEvent::Observed {
                seq,
                state,
                became_available,
                ..
            }) => (seq, state, became_available),
            other => panic!("expected Observed, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_check_is_immediate_then_every_interval() {
        let mut h = harness(ResourceQuery::new("25skmystery01", "FR"));
        h.vendor
            .set_default_availability(Ok(MockVendor::status("rbx", "unavailable")));

        h.poller.start(h.events_tx.clone()).await.unwrap();
        let (seq, state, _) = next_observed(&mut h.events_rx).await;
        assert_eq!((seq, state), (1, AvailabilityState::Unavailable));
        assert_eq!(h.vendor.check_calls(), 1);

        tokio::time::sleep(POLL_INTERVAL - Duration::from_secs(1)).await;
        assert_eq!(h.vendor.check_calls(), 1);

        let (seq, _, _) = next_observed(&mut h.events_rx).await;
        assert_eq!(seq, 2);
        assert_eq!(h.vendor.check_calls(), 2);

        h.poller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_sets_unknown_and_polling_continues() {
        let mut h = harness(ResourceQuery::new("25skmystery01", "FR"));
        h.vendor
            .push_availability(Err(ApiError::Transport("connection reset".to_string())));
        h.vendor
            .set_default_availability(Ok(MockVendor::status("rbx", "unavailable")));

        h.poller.start(h.events_tx.clone()).await.unwrap();

        let (_, state, _) = next_observed(&mut h.events_rx).await;
        assert_eq!(state, AvailabilityState::Unknown);
        assert_eq!(h.poller.state(), AvailabilityState::Unknown);
        assert_eq!(h.sink.notifications(NotifyKind::Error), vec!["Monitoring error"]);

        let (seq, state, _) = next_observed(&mut h.events_rx).await;
        assert_eq!(seq, 2);
        assert_eq!(state, AvailabilityState::Unavailable);

        h.poller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_transition_detection_ignores_checking() {
        let mut h = harness(ResourceQuery::new("25skmystery01", "FR"));
        h.vendor
            .push_availability(Ok(MockVendor::status("rbx", "available")));
        h.vendor
            .push_availability(Ok(MockVendor::status("rbx", "available")));
        h.vendor
            .push_availability(Ok(MockVendor::status("rbx", "unavailable")));
        h.vendor
            .set_default_availability(Ok(MockVendor::status("rbx", "available")));

        h.poller.start(h.events_tx.clone()).await.unwrap();

        // Unknown -> Available, Available -> (Checking) -> Available,
        // Available -> Unavailable, Unavailable -> Available.
        let flags: Vec<bool> = [
            next_observed(&mut h.events_rx).await,
            next_observed(&mut h.events_rx).await,
            next_observed(&mut h.events_rx).await,
            next_observed(&mut h.events_rx).await,
        ]
        .iter()
        .map(|(_, _, became)| *became)
        .collect();
        assert_eq!(flags, vec![true, false, false, true]);
        assert_eq!(h.sink.notifications(NotifyKind::Success).len(), 2);

        h.poller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_result_is_no_data() {
        let mut h = harness(ResourceQuery::new("25skmystery01", "FR").with_datacenter("bhs"));
        h.vendor
            .set_default_availability(Ok(MockVendor::status("rbx", "available")));

        h.poller.start(h.events_tx.clone()).await.unwrap();
        let (_, state, became) = next_observed(&mut h.events_rx).await;

        assert_eq!(state, AvailabilityState::Unknown);
        assert!(!became);
        assert_eq!(h.sink.logs(LogLevel::Warning).len(), 1);
        assert!(h.sink.notifications(NotifyKind::Error).is_empty());

        h.poller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_result_is_discarded() {
        let mut h = harness(ResourceQuery::new("25skmystery01", "FR"));
        // The first check outlives the second tick.
        h.vendor
            .set_check_delay(POLL_INTERVAL + Duration::from_secs(30));
        h.vendor
            .push_availability(Ok(MockVendor::status("rbx", "available")));
        h.vendor
            .set_default_availability(Ok(MockVendor::status("rbx", "unavailable")));

        h.poller.start(h.events_tx.clone()).await.unwrap();

        // Let tick 2 start with a short check so it overtakes tick 1.
        tokio::time::sleep(Duration::from_secs(1)).await;
        h.vendor.set_check_delay(Duration::from_secs(5));

        let (seq, state, _) = next_observed(&mut h.events_rx).await;
        assert_eq!((seq, state), (2, AvailabilityState::Unavailable));

        // Tick 1 finishes at t=90s and must not overwrite seq 2.
        tokio::time::sleep(Duration::from_secs(40)).await;
        assert_eq!(h.poller.state(), AvailabilityState::Unavailable);
        assert_eq!(h.poller.snapshot().seq, 2);
        assert!(h.events_rx.try_recv().is_err());

        h.poller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_resets_and_silences_timer() {
        let mut h = harness(ResourceQuery::new("25skmystery01", "FR"));
        h.vendor
            .set_default_availability(Ok(MockVendor::status("rbx", "available")));

        h.poller.start(h.events_tx.clone()).await.unwrap();
        next_observed(&mut h.events_rx).await;
        assert_eq!(h.poller.state(), AvailabilityState::Available);

        h.poller.stop().await;
        assert!(!h.poller.is_running().await);
        assert_eq!(h.poller.state(), AvailabilityState::Unknown);
        assert_eq!(h.events_rx.recv().await, Some(PollerEvent::Reset));

        let calls = h.vendor.check_calls();
        tokio::time::sleep(POLL_INTERVAL * 3).await;
        assert_eq!(h.vendor.check_calls(), calls);

        // Idempotent.
        h.poller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_start_is_rejected() {
        let h = harness(ResourceQuery::new("25skmystery01", "FR"));
        h.poller.start(h.events_tx.clone()).await.unwrap();
        assert_eq!(
            h.poller.start(h.events_tx.clone()).await,
            Err(SessionError::AlreadyMonitoring)
        );
        h.poller.stop().await;
    }
}
