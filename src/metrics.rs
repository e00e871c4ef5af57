//! Prometheus metrics for the relay routes.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;
use tracing::warn;

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus recorder once and return its render handle.
///
/// Safe to call repeatedly (every router built in tests calls it); later
/// calls reuse the first recorder.
pub fn install() -> PrometheusHandle {
    HANDLE
        .get_or_init(|| {
            let recorder = PrometheusBuilder::new().build_recorder();
            let handle = recorder.handle();
            if metrics::set_global_recorder(recorder).is_err() {
                warn!("A global metrics recorder is already installed; /metrics will be empty");
            }
            describe();
            handle
        })
        .clone()
}

fn describe() {
    describe_counter!("relay_requests_total", "Relay requests by route and status");
    describe_histogram!(
        "relay_request_duration_seconds",
        "Time until response headers were ready, by route"
    );
    describe_counter!(
        "relay_upstream_errors_total",
        "Upstream fetches that failed or returned non-2xx"
    );
    describe_counter!(
        "relay_rewritten_uris_total",
        "Playlist references rewritten, by kind"
    );
}

pub fn record_request(route: &'static str, status: u16) {
    counter!("relay_requests_total", "route" => route, "status" => status.to_string())
        .increment(1);
}

pub fn record_duration(route: &'static str, start: Instant) {
    histogram!("relay_request_duration_seconds", "route" => route)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_upstream_error(route: &'static str) {
    counter!("relay_upstream_errors_total", "route" => route).increment(1);
}

pub fn record_rewritten(kind: &'static str, count: usize) {
    if count > 0 {
        counter!("relay_rewritten_uris_total", "kind" => kind).increment(count as u64);
    }
}
