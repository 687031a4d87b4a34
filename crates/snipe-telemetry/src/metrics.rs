//! Prometheus metrics for the sniper.
//!
//! Covers:
//! - Availability checks and the current availability state
//! - Purchase attempts and loop activity
//! - Vendor call latency and errors
//! - Outbound notification delivery
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. If registration fails,
//! it indicates a fatal configuration error (e.g., duplicate metric names)
//! that should cause an immediate crash at startup rather than silent failure.
//! These panics only occur during static initialization, never at runtime.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};

use snipe_core::AvailabilityState;

use crate::error::{TelemetryError, TelemetryResult};

/// Completed availability checks.
/// Labels: plan, outcome (available/unavailable/no_data/error)
pub static CHECKS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "snipe_checks_total",
        "Completed availability checks by outcome",
        &["plan", "outcome"]
    )
    .unwrap()
});

/// Current availability state (one-hot).
/// Labels: plan, state (unknown/checking/available/unavailable)
pub static AVAILABILITY_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "snipe_availability_state",
        "Current availability state (1=active, 0=inactive)",
        &["plan", "state"]
    )
    .unwrap()
});

/// Purchase attempts.
/// Labels: plan, outcome (success/failure)
pub static PURCHASE_ATTEMPTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "snipe_purchase_attempts_total",
        "Purchase attempts by outcome",
        &["plan", "outcome"]
    )
    .unwrap()
});

/// Purchase loop state (1 = active).
pub static LOOP_ACTIVE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "snipe_loop_active",
        "Purchase loop state (1=active)",
        &["plan"]
    )
    .unwrap()
});

/// Vendor call latency in seconds.
pub static VENDOR_LATENCY_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "snipe_vendor_latency_seconds",
        "Vendor API call latency in seconds",
        &["operation"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]
    )
    .unwrap()
});

/// Failed vendor calls.
/// Labels: operation, kind (transport/vendor/protocol/signer/config)
pub static VENDOR_ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "snipe_vendor_errors_total",
        "Failed vendor API calls by error kind",
        &["operation", "kind"]
    )
    .unwrap()
});

/// Outbound notification deliveries.
/// Labels: channel, outcome (sent/failed/dropped)
pub static NOTIFICATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "snipe_notifications_total",
        "Outbound notification deliveries by outcome",
        &["channel", "outcome"]
    )
    .unwrap()
});

const STATES: [AvailabilityState; 4] = [
    AvailabilityState::Unknown,
    AvailabilityState::Checking,
    AvailabilityState::Available,
    AvailabilityState::Unavailable,
];

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    /// Record a finished availability check.
    pub fn check_completed(plan: &str, outcome: &str) {
        CHECKS_TOTAL.with_label_values(&[plan, outcome]).inc();
    }

    /// Set the availability state. Only the active state is 1.
    pub fn availability_set(plan: &str, state: AvailabilityState) {
        for s in STATES {
            let label = s.to_string();
            let value = if s == state { 1.0 } else { 0.0 };
            AVAILABILITY_STATE
                .with_label_values(&[plan, label.as_str()])
                .set(value);
        }
    }

    /// Record a purchase attempt outcome.
    pub fn purchase_attempt(plan: &str, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        PURCHASE_ATTEMPTS_TOTAL
            .with_label_values(&[plan, outcome])
            .inc();
    }

    pub fn loop_active(plan: &str, active: bool) {
        LOOP_ACTIVE
            .with_label_values(&[plan])
            .set(if active { 1.0 } else { 0.0 });
    }

    /// Record vendor call latency.
    pub fn vendor_latency(operation: &str, secs: f64) {
        VENDOR_LATENCY_SECONDS
            .with_label_values(&[operation])
            .observe(secs);
    }

    pub fn vendor_error(operation: &str, kind: &str) {
        VENDOR_ERRORS_TOTAL
            .with_label_values(&[operation, kind])
            .inc();
    }

    pub fn notification(channel: &str, outcome: &str) {
        NOTIFICATIONS_TOTAL
            .with_label_values(&[channel, outcome])
            .inc();
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn render() -> TelemetryResult<String> {
        let encoder = TextEncoder::new();
        let families = prometheus::gather();

        let mut buffer = Vec::new();
        encoder
            .encode(&families, &mut buffer)
            .map_err(|e| TelemetryError::Metrics(format!("Failed to encode metrics: {e}")))?;

        String::from_utf8(buffer).map_err(|e| TelemetryError::Metrics(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_availability_is_one_hot() {
        Metrics::availability_set("test-plan-a", AvailabilityState::Available);
        Metrics::availability_set("test-plan-a", AvailabilityState::Unavailable);

        let get = |state: &str| {
            AVAILABILITY_STATE
                .with_label_values(&["test-plan-a", state])
                .get()
        };
        assert_eq!(get("unavailable"), 1.0);
        assert_eq!(get("available"), 0.0);
        assert_eq!(get("unknown"), 0.0);
    }

    #[test]
    fn test_counters_and_render() {
        Metrics::check_completed("test-plan-b", "error");
        Metrics::purchase_attempt("test-plan-b", false);
        Metrics::loop_active("test-plan-b", true);
        Metrics::vendor_latency("availability", 0.2);

        assert_eq!(
            PURCHASE_ATTEMPTS_TOTAL
                .with_label_values(&["test-plan-b", "failure"])
                .get(),
            1.0
        );

        let text = Metrics::render().unwrap();
        assert!(text.contains("snipe_checks_total"));
        assert!(text.contains("snipe_loop_active"));
        assert!(text.contains("snipe_vendor_latency_seconds_bucket"));
    }
}
