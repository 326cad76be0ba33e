//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define gateway metrics
//! - Expose a Prometheus-compatible scrape endpoint
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by method, status, target
//! - `gateway_request_duration_seconds` (histogram): end-to-end latency
//! - `gateway_upstream_attempts_total` (counter): dispatch attempts by target, outcome
//! - `gateway_rate_limited_total` (counter): rejections by tier
//! - `gateway_rate_limit_store_errors_total` (counter): fail-open store errors
//! - `gateway_circuit_transitions_total` (counter): breaker transitions by target, state
//! - `gateway_discovery_errors_total` (counter): discovery transport errors by backend
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, so the library and tests need no setup
//! - Histogram buckets tuned for typical web latencies

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder};

const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Install the Prometheus recorder and its HTTP scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Full("gateway_request_duration_seconds".to_string()),
            LATENCY_BUCKETS,
        )?
        .install()?;

    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_request(method: &str, status: u16, target: &str, start: Instant) {
    let status = status.to_string();
    ::metrics::counter!(
        "gateway_requests_total",
        "method" => method.to_string(),
        "status" => status.clone(),
        "target" => target.to_string()
    )
    .increment(1);
    ::metrics::histogram!(
        "gateway_request_duration_seconds",
        "method" => method.to_string(),
        "status" => status,
        "target" => target.to_string()
    )
    .record(start.elapsed().as_secs_f64());
}

pub fn record_upstream_attempt(target: &str, outcome: &'static str) {
    ::metrics::counter!(
        "gateway_upstream_attempts_total",
        "target" => target.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_rate_limited(tier: &'static str) {
    ::metrics::counter!("gateway_rate_limited_total", "tier" => tier).increment(1);
}

pub fn record_rate_limit_store_error() {
    ::metrics::counter!("gateway_rate_limit_store_errors_total").increment(1);
}

pub fn record_circuit_transition(target: &str, state: &'static str) {
    ::metrics::counter!(
        "gateway_circuit_transitions_total",
        "target" => target.to_string(),
        "state" => state
    )
    .increment(1);
}

pub fn record_discovery_error(backend: &'static str) {
    ::metrics::counter!("gateway_discovery_errors_total", "backend" => backend).increment(1);
}
