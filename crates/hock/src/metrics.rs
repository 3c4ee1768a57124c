//! Prometheus metrics for hock.
//!
//! Tracks dispatched and unmatched requests and applied reply delays.
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram, CounterVec, Encoder, Histogram, TextEncoder,
};

lazy_static! {
    /// Requests handled, by method and outcome (matched|unmatched|aborted)
    pub static ref REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "hock_requests_total",
        "Total number of requests handled by hock",
        &["method", "outcome"]
    )
    .unwrap();

    /// Delay applied before replies, in milliseconds
    pub static ref REPLY_DELAY_MS: Histogram = register_histogram!(
        "hock_reply_delay_ms",
        "Histogram of delays applied before replies in milliseconds",
        vec![1.0, 10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0]
    )
    .unwrap();
}

pub fn record_request(method: &str, outcome: &str) {
    REQUESTS_TOTAL.with_label_values(&[method, outcome]).inc();
}

pub fn record_delay(ms: u64) {
    REPLY_DELAY_MS.observe(ms as f64);
}

/// Render all registered metrics in the Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
