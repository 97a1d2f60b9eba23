//! Metrics and observability utilities
//!
//! Provides Prometheus metrics with standardized naming conventions.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all Follow-Up metrics
pub const METRICS_PREFIX: &str = "followup";

/// Histogram buckets for request latency (in seconds).
/// Uploads are processed row by row, so the tail reaches into minutes.
pub const LATENCY_BUCKETS: &[f64] = &[
    0.005,  // 5ms
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
    60.00,  // 1m
    120.0,  // 2m
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Request metrics
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    // Import metrics
    describe_counter!(
        format!("{}_imports_total", METRICS_PREFIX),
        Unit::Count,
        "Spreadsheet imports by kind and outcome"
    );

    describe_counter!(
        format!("{}_import_rows_accepted_total", METRICS_PREFIX),
        Unit::Count,
        "Rows that passed the required-field filter"
    );

    describe_counter!(
        format!("{}_import_rows_processed_total", METRICS_PREFIX),
        Unit::Count,
        "Rows fully reconciled"
    );

    describe_counter!(
        format!("{}_import_row_errors_total", METRICS_PREFIX),
        Unit::Count,
        "Rows that failed reconciliation"
    );

    describe_histogram!(
        format!("{}_import_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Import latency in seconds"
    );

    // Auth metrics
    describe_counter!(
        format!("{}_logins_total", METRICS_PREFIX),
        Unit::Count,
        "Login attempts by outcome"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Helper to record the outcome of one import
pub fn record_import(
    kind: &'static str,
    accepted: usize,
    processed: usize,
    errors: usize,
    duration_secs: f64,
    success: bool,
) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_imports_total", METRICS_PREFIX),
        "kind" => kind,
        "status" => status
    )
    .increment(1);

    counter!(format!("{}_import_rows_accepted_total", METRICS_PREFIX), "kind" => kind)
        .increment(accepted as u64);

    counter!(format!("{}_import_rows_processed_total", METRICS_PREFIX), "kind" => kind)
        .increment(processed as u64);

    if errors > 0 {
        counter!(format!("{}_import_row_errors_total", METRICS_PREFIX), "kind" => kind)
            .increment(errors as u64);
    }

    histogram!(format!("{}_import_duration_seconds", METRICS_PREFIX), "kind" => kind)
        .record(duration_secs);
}

/// Helper to record a login attempt
pub fn record_login(success: bool) {
    let status = if success { "success" } else { "rejected" };

    counter!(
        format!("{}_logins_total", METRICS_PREFIX),
        "status" => status
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_buckets() {
        let mut prev = 0.0;
        for &bucket in LATENCY_BUCKETS {
            assert!(bucket > prev);
            prev = bucket;
        }

        // The request timeout must fall inside the histogram range
        assert!(LATENCY_BUCKETS.contains(&120.0));
    }

    #[test]
    fn test_recorders_without_exporter() {
        // No recorder installed: every call is a no-op
        let metrics = RequestMetrics::start("POST", "/v1/imports/sessions");
        metrics.finish(200);
        record_import("sessions", 3, 2, 1, 0.25, true);
        record_login(false);
    }
}
