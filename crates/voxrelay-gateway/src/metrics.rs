//! Prometheus metrics recording and endpoint.

use std::time::Instant;

use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use voxrelay_core::types::Stage;

/// Install the Prometheus metrics recorder and return the handle for rendering.
pub fn install_prometheus_recorder() -> anyhow::Result<PrometheusHandle> {
    Ok(PrometheusBuilder::new().install_recorder()?)
}

/// Middleware timing every routed request.
pub async fn track_requests(request: Request, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let started = Instant::now();
    let response = next.run(request).await;
    record_request(&route, response.status().as_u16(), started.elapsed().as_secs_f64());
    response
}

/// Record a finished relay request.
pub fn record_request(route: &str, status: u16, duration_secs: f64) {
    let labels = [("route", route.to_string()), ("status", status.to_string())];
    metrics::counter!("relay_requests_total", &labels).increment(1);
    metrics::histogram!("relay_request_duration_seconds", &labels).record(duration_secs);
}

/// Record how long one upstream step took.
pub fn record_stage(stage: Stage, duration_secs: f64) {
    let labels = [("stage", stage_label(stage).to_string())];
    metrics::histogram!("relay_stage_duration_seconds", &labels).record(duration_secs);
}

/// Record an error response.
pub fn record_error(stage: Option<Stage>, status: u16) {
    let labels = [
        ("stage", stage.map(stage_label).unwrap_or("none").to_string()),
        ("status", status.to_string()),
    ];
    metrics::counter!("relay_errors_total", &labels).increment(1);
}

fn stage_label(stage: Stage) -> &'static str {
    match stage {
        Stage::Upload => "upload",
        Stage::Transcribe => "transcribe",
        Stage::Generate => "generate",
        Stage::Synthesize => "synthesize",
    }
}
