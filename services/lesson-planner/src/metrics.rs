//! Prometheus metrics exposition
//!
//! HTTP-level metrics recorded here:
//!
//! - `http_requests_total` (counter): labels `route`, `status`
//! - `http_request_duration_seconds` (histogram): label `route`
//!
//! The generation controller records `generation_attempts_total`,
//! `credential_rotations_total` and `generation_failures_total` through the
//! same recorder.

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

const DURATION_METRIC: &str = "http_request_duration_seconds";

/// Generation calls can take a full minute per attempt, so buckets reach 120s.
const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0,
];

fn builder() -> PrometheusBuilder {
    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(DURATION_METRIC.to_string()), DURATION_BUCKETS)
        .expect("failed to set histogram buckets")
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_recorder() -> PrometheusHandle {
    builder()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record a completed request.
pub fn record_request(route: &str, status: u16, duration_secs: f64) {
    let route = route.to_string();
    metrics::counter!("http_requests_total", "route" => route.clone(), "status" => status.to_string())
        .increment(1);
    metrics::histogram!(DURATION_METRIC, "route" => route).record(duration_secs);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusRecorder;

    #[test]
    fn record_request_does_not_panic_without_recorder() {
        record_request("/api/plans", 200, 0.05);
    }

    fn isolated_recorder() -> (PrometheusRecorder, PrometheusHandle) {
        let recorder = builder().build_recorder();
        let handle = recorder.handle();
        (recorder, handle)
    }

    #[test]
    fn record_request_renders_counter_and_histogram() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_request("/api/plans", 200, 12.5);
        record_request("/api/login", 403, 0.01);

        let output = handle.render();
        assert!(output.contains("http_requests_total"));
        assert!(output.contains("route=\"/api/plans\""));
        assert!(output.contains("status=\"403\""));
        assert!(
            output.contains("http_request_duration_seconds_bucket"),
            "histogram must render _bucket lines"
        );
        assert!(output.contains("le=\"120\""), "120s bucket must exist");
        assert!(output.contains("le=\"0.005\""), "5ms bucket must exist");
    }
}
