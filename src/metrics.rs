//! Metrics and telemetry for the Graphite query layer
//!
//! Prometheus counters and histograms for query outcomes, storage fetches,
//! bind failures and consolidation anomalies.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

lazy_static! {
    /// Total query executions by outcome
    pub static ref QUERIES_TOTAL: CounterVec = register_counter_vec!(
        "graphite_queries_total",
        "Total query executions",
        &["status"]
    ).unwrap();

    /// Total storage fetches by outcome
    pub static ref FETCH_TOTAL: CounterVec = register_counter_vec!(
        "graphite_fetch_total",
        "Total storage fetches issued by fetch expressions",
        &["status"]
    ).unwrap();

    /// Storage fetch duration
    pub static ref FETCH_DURATION: HistogramVec = register_histogram_vec!(
        "graphite_fetch_duration_seconds",
        "Storage fetch latency in seconds",
        &["status"],
        vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 30.0]
    ).unwrap();

    /// Bind failures by reason
    pub static ref BIND_ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "graphite_bind_errors_total",
        "Total function binding failures by reason",
        &["reason"]
    ).unwrap();

    /// Datapoints dropped by consolidation because they landed behind the cursor
    pub static ref DISCARDED_DATAPOINTS_TOTAL: CounterVec = register_counter_vec!(
        "graphite_discarded_datapoints_total",
        "Datapoints discarded during consolidation",
        &["mode"]
    ).unwrap();
}

/// Get metrics in Prometheus text format
pub fn gather_metrics() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;

    String::from_utf8(buffer).map_err(|e| format!("Metrics contain invalid UTF-8: {}", e))
}

/// Record a finished query execution
#[inline]
pub fn record_query(success: bool) {
    let status = if success { "success" } else { "error" };
    QUERIES_TOTAL.with_label_values(&[status]).inc();
}

/// Record a storage fetch
#[inline]
pub fn record_fetch(duration_secs: f64, success: bool) {
    let status = if success { "success" } else { "error" };

    FETCH_TOTAL.with_label_values(&[status]).inc();

    FETCH_DURATION
        .with_label_values(&[status])
        .observe(duration_secs);
}

/// Record a bind failure
#[inline]
pub fn record_bind_error(reason: &str) {
    BIND_ERRORS_TOTAL.with_label_values(&[reason]).inc();
}

/// Record datapoints discarded by a consolidation pass
#[inline]
pub fn record_discarded(mode: &str, count: usize) {
    if count > 0 {
        DISCARDED_DATAPOINTS_TOTAL
            .with_label_values(&[mode])
            .inc_by(count as f64);
    }
}
