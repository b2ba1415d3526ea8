//! Process-wide Prometheus metrics.
//!
//! Modeled as a registry object handed to components at construction
//! time (§9 "Global mutable state") rather than free-standing globals,
//! with the handles themselves built once via `once_cell::sync::Lazy` so
//! cloning a `Metrics` is just cloning `Arc`-backed prometheus types.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec_with_registry, register_gauge_vec_with_registry,
    register_gauge_with_registry, register_histogram_vec_with_registry, CounterVec, Encoder,
    Gauge, GaugeVec, HistogramVec, Registry, TextEncoder,
};

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);
static METRICS: Lazy<Metrics> = Lazy::new(|| Metrics::with_registry(&REGISTRY));

#[derive(Clone)]
pub struct Metrics {
    pub pool_size: Gauge,
    pub subscriptions_per_connection: HistogramVec,
    pub messages_dropped: CounterVec,
    pub updates_dropped: CounterVec,
    pub book_lock_wait_seconds: HistogramVec,
    pub opportunities_detected: CounterVec,
    pub opportunities_skipped: CounterVec,
    pub executions: CounterVec,
    pub cumulative_profit: Gauge,
    pub fill_outcomes: CounterVec,
    pub breaker_state_changes: CounterVec,
    pub breaker_check_seconds: HistogramVec,
    pub breaker_enabled: GaugeVec,
}

impl Metrics {
    pub fn new() -> Self {
        METRICS.clone()
    }

    fn with_registry(registry: &Registry) -> Self {
        Self {
            pool_size: register_gauge_with_registry!(
                "stream_pool_size",
                "Number of active stream connections",
                registry.clone()
            )
            .expect("register pool_size gauge"),
            subscriptions_per_connection: register_histogram_vec_with_registry!(
                "stream_connection_subscriptions",
                "Distribution of tracked subscriptions per connection",
                &["connection_id"],
                registry.clone()
            )
            .expect("register subscriptions histogram"),
            messages_dropped: register_counter_vec_with_registry!(
                "messages_dropped_total",
                "Messages dropped due to backpressure, labelled by reason",
                &["reason"],
                registry.clone()
            )
            .expect("register messages_dropped counter"),
            updates_dropped: register_counter_vec_with_registry!(
                "updates_dropped_total",
                "Book change notifications dropped due to backpressure",
                &["reason"],
                registry.clone()
            )
            .expect("register updates_dropped counter"),
            book_lock_wait_seconds: register_histogram_vec_with_registry!(
                "book_lock_wait_seconds",
                "Time spent contending for the snapshot map",
                &["op"],
                registry.clone()
            )
            .expect("register book_lock_wait_seconds histogram"),
            opportunities_detected: register_counter_vec_with_registry!(
                "opportunities_detected_total",
                "Opportunities emitted by the detector",
                &["market_id"],
                registry.clone()
            )
            .expect("register opportunities_detected counter"),
            opportunities_skipped: register_counter_vec_with_registry!(
                "opportunities_skipped_total",
                "Opportunities skipped before execution, labelled by reason",
                &["reason"],
                registry.clone()
            )
            .expect("register opportunities_skipped counter"),
            executions: register_counter_vec_with_registry!(
                "executions_total",
                "Execution attempts, labelled by outcome",
                &["result"],
                registry.clone()
            )
            .expect("register executions counter"),
            cumulative_profit: register_gauge_with_registry!(
                "cumulative_realized_profit_usd",
                "Cumulative realized profit in USD",
                registry.clone()
            )
            .expect("register cumulative_profit gauge"),
            fill_outcomes: register_counter_vec_with_registry!(
                "fill_outcomes_total",
                "Fill verification outcomes, labelled by kind",
                &["kind"],
                registry.clone()
            )
            .expect("register fill_outcomes counter"),
            breaker_state_changes: register_counter_vec_with_registry!(
                "breaker_state_changes_total",
                "Circuit breaker enable/disable transitions",
                &["direction"],
                registry.clone()
            )
            .expect("register breaker_state_changes counter"),
            breaker_check_seconds: register_histogram_vec_with_registry!(
                "breaker_check_seconds",
                "Duration of each circuit breaker balance check",
                &["result"],
                registry.clone()
            )
            .expect("register breaker_check_seconds histogram"),
            breaker_enabled: register_gauge_vec_with_registry!(
                "breaker_enabled",
                "1 if the circuit breaker currently permits execution",
                &["breaker"],
                registry.clone()
            )
            .expect("register breaker_enabled gauge"),
        }
    }

    pub fn registry(&self) -> &Registry {
        &REGISTRY
    }

    /// Renders the process-wide registry in Prometheus text exposition
    /// format, for the `/metrics` probe.
    pub fn export(&self) -> String {
        let metric_families = REGISTRY.gather();
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .expect("encode prometheus metrics");
        String::from_utf8(buffer).expect("prometheus output is utf8")
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
