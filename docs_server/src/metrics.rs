//! Prometheus metrics for the build queue.

use metrics::{counter, histogram};

/// Initialize metrics exporter (Prometheus).
pub fn init_metrics() {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    if let Err(e) = builder.install() {
        tracing::warn!("Failed to install Prometheus exporter: {}", e);
    }
}

/// Record a build state transition.
pub fn build_status_changed(status: &str) {
    counter!("docs_builds_total", "status" => status.to_string()).increment(1);
}

/// Record a claim attempt: `claimed`, `empty` or `error`.
pub fn claim_attempt(outcome: &'static str) {
    counter!("docs_claims_total", "outcome" => outcome).increment(1);
}

/// Record a report the queue refused (`not_found`, `conflict`).
pub fn report_rejected(reason: &'static str) {
    counter!("docs_reports_rejected_total", "reason" => reason).increment(1);
}

/// Record build duration as measured by the builder.
pub fn build_duration(duration_ms: u64) {
    histogram!("docs_build_duration_ms").record(duration_ms as f64);
}
