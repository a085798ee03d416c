//! # Metrics Collection
//!
//! Request and domain metrics recorded through the `metrics` facade and exposed in the
//! Prometheus text format.
//!
//! ## Key Features
//! - Per-route request counts and latency histograms labelled by method, route and status
//! - Counters for created and updated observation sets
//! - Counters for published and failed domain events
//!
//! ## Rust Concepts Used
//! - `metrics` macros returning handles that are cheap to create on every call
//! - Axum `from_fn` middleware wrapping the whole router
//! - `MatchedPath` so the route template, not the raw URI, becomes a label

use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Instant;

use crate::core::error::{ObservationsError, ObservationsResult};

pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";
pub const OBSERVATION_SETS_CREATED_TOTAL: &str = "observation_sets_created_total";
pub const OBSERVATION_SETS_UPDATED_TOTAL: &str = "observation_sets_updated_total";
pub const OBSERVATION_EVENTS_PUBLISHED_TOTAL: &str = "observation_events_published_total";
pub const OBSERVATION_EVENTS_FAILED_TOTAL: &str = "observation_events_failed_total";

const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Install the global Prometheus recorder and return the handle used to render it
pub fn install_recorder() -> ObservationsResult<PrometheusHandle> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(HTTP_REQUEST_DURATION_SECONDS.to_string()),
            LATENCY_BUCKETS,
        )
        .map_err(|e| ObservationsError::config(format!("Failed to set histogram buckets: {}", e)))?
        .install_recorder()
        .map_err(|e| ObservationsError::config(format!("Failed to install metrics recorder: {}", e)))
}

/// Record count and latency of every request
pub async fn track_metrics(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let method = request.method().to_string();

    let response = next.run(request).await;

    let status = response.status().as_u16().to_string();
    metrics::counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "route" => route.clone(), "status" => status.clone())
        .increment(1);
    metrics::histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "route" => route, "status" => status)
        .record(started.elapsed().as_secs_f64());

    response
}

/// Prometheus exposition handler
pub async fn render_metrics(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    handle.render()
}

pub fn record_set_created() {
    metrics::counter!(OBSERVATION_SETS_CREATED_TOTAL).increment(1);
}

pub fn record_set_updated() {
    metrics::counter!(OBSERVATION_SETS_UPDATED_TOTAL).increment(1);
}

pub fn record_event_published(event: &'static str) {
    metrics::counter!(OBSERVATION_EVENTS_PUBLISHED_TOTAL, "event" => event).increment(1);
}

pub fn record_event_failed(event: &'static str) {
    metrics::counter!(OBSERVATION_EVENTS_FAILED_TOTAL, "event" => event).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_a_no_op() {
        record_set_created();
        record_set_updated();
        record_event_published("ENCOUNTER_UPDATED");
        record_event_failed("ENCOUNTER_UPDATED");
    }

    #[test]
    fn test_recorder_renders_counters() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            record_set_created();
            record_event_published("OBSERVATION_SET_UPDATED");
        });

        let rendered = handle.render();
        assert!(rendered.contains(OBSERVATION_SETS_CREATED_TOTAL));
        assert!(rendered.contains("event=\"OBSERVATION_SET_UPDATED\""));
    }
}
