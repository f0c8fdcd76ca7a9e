//! Prometheus metrics exposition
//!
//! - `bridge_requests_total` (counter): label `outcome`
//! - `bridge_request_duration_seconds` (histogram): label `outcome`
//! - `bridge_challenges_issued_total` (counter)
//! - `bridge_challenge_evictions_total` (counter): label `reason`
//! - `bridge_provider_errors_total` (counter): label `error_type`

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Instant;

const DURATION_METRIC: &str = "bridge_request_duration_seconds";

/// Provider calls can take several seconds (CLI start-up), so buckets run to 60s.
const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

fn builder() -> Result<PrometheusBuilder, metrics_exporter_prometheus::BuildError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(DURATION_METRIC.to_string()), DURATION_BUCKETS)
}

/// Install the global Prometheus recorder and return a handle for `/metrics`.
pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    let handle = builder()?.install_recorder()?;
    Ok(handle)
}

/// In-process counters reported by `/health`.
#[derive(Debug, Clone)]
pub struct ServiceMetrics {
    pub requests_total: Arc<AtomicU64>,
    pub errors_total: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self {
            requests_total: Arc::new(AtomicU64::new(0)),
            errors_total: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }
}

/// Record a finished token request.
pub fn record_request(outcome: &'static str, duration_secs: f64) {
    metrics::counter!("bridge_requests_total", "outcome" => outcome).increment(1);
    metrics::histogram!(DURATION_METRIC, "outcome" => outcome).record(duration_secs);
}

pub fn record_challenge_issued() {
    metrics::counter!("bridge_challenges_issued_total").increment(1);
}

/// Record a cache eviction (`consumed`, `expired` or `shutdown`).
pub fn record_eviction(reason: &'static str) {
    metrics::counter!("bridge_challenge_evictions_total", "reason" => reason).increment(1);
}

pub fn record_provider_error(error_type: &'static str) {
    metrics::counter!("bridge_provider_errors_total", "error_type" => error_type).increment(1);
}
