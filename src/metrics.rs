//! Prometheus metrics for the relay
//!
//! Exposes metrics on /metrics endpoint for Prometheus scraping.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec, CounterVec,
    Encoder, Gauge, GaugeVec, HistogramVec, TextEncoder,
};

lazy_static! {
    // Cycle metrics
    pub static ref CYCLES: CounterVec = register_counter_vec!(
        "hpoint_relay_cycles_total",
        "Reconciliation cycles by outcome",
        &["direction", "outcome"]
    ).expect("constant metric name is valid");

    pub static ref RECORDS_RELAYED: CounterVec = register_counter_vec!(
        "hpoint_relay_records_relayed_total",
        "Requests transferred and settled",
        &["direction"]
    ).expect("constant metric name is valid");

    pub static ref CYCLE_DURATION: HistogramVec = register_histogram_vec!(
        "hpoint_relay_cycle_duration_seconds",
        "Wall time of a reconciliation cycle",
        &["direction"],
        vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0]
    ).expect("constant metric name is valid");

    pub static ref LAST_SUCCESSFUL_CYCLE: GaugeVec = register_gauge_vec!(
        "hpoint_relay_last_successful_cycle_timestamp",
        "Unix timestamp of the last cycle that ended without error",
        &["direction"]
    ).expect("constant metric name is valid");

    // Ledger state
    pub static ref PENDING_BACKLOG: GaugeVec = register_gauge_vec!(
        "hpoint_relay_pending_backlog",
        "Pending requests seen on the origin ledger at the last read",
        &["chain"]
    ).expect("constant metric name is valid");

    /// 0 idle, 1 in flight, 2 halted
    pub static ref DIRECTION_STATE: GaugeVec = register_gauge_vec!(
        "hpoint_relay_direction_state",
        "Direction state (0 idle, 1 in flight, 2 halted)",
        &["direction"]
    ).expect("constant metric name is valid");

    // Error metrics
    pub static ref ERRORS: CounterVec = register_counter_vec!(
        "hpoint_relay_errors_total",
        "Ledger errors by chain and type",
        &["chain", "type"]
    ).expect("constant metric name is valid");

    // Fast path
    pub static ref FAST_PATH_NOTICES: CounterVec = register_counter_vec!(
        "hpoint_relay_fast_path_notices_total",
        "Request notifications by what the fast path did with them",
        &["direction", "result"]
    ).expect("constant metric name is valid");

    pub static ref UP: Gauge = register_gauge!(
        "hpoint_relay_up",
        "Whether the relay is up and running"
    ).expect("constant metric name is valid");
}

pub fn record_cycle(direction: &str, outcome: &str, seconds: f64) {
    CYCLES.with_label_values(&[direction, outcome]).inc();
    CYCLE_DURATION
        .with_label_values(&[direction])
        .observe(seconds);
}

pub fn record_relayed(direction: &str, records: usize) {
    RECORDS_RELAYED
        .with_label_values(&[direction])
        .inc_by(records as f64);
    LAST_SUCCESSFUL_CYCLE
        .with_label_values(&[direction])
        .set(chrono::Utc::now().timestamp() as f64);
}

/// Cycle ended cleanly with nothing to do
pub fn record_idle(direction: &str) {
    LAST_SUCCESSFUL_CYCLE
        .with_label_values(&[direction])
        .set(chrono::Utc::now().timestamp() as f64);
}

pub fn set_pending_backlog(chain: &str, records: usize) {
    PENDING_BACKLOG
        .with_label_values(&[chain])
        .set(records as f64);
}

pub fn set_direction_state(direction: &str, value: i64) {
    DIRECTION_STATE
        .with_label_values(&[direction])
        .set(value as f64);
}

pub fn record_error(chain: &str, error_type: &str) {
    ERRORS.with_label_values(&[chain, error_type]).inc();
}

pub fn record_fast_path(direction: &str, result: &str) {
    FAST_PATH_NOTICES
        .with_label_values(&[direction, result])
        .inc();
}

/// Render the default registry in the text exposition format
pub fn render() -> Result<(String, Vec<u8>), prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok((encoder.format_type().to_string(), buffer))
}
