//! Prometheus metrics for Qave.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`,
//! defines metric name constants, provides the HTTP RED middleware, and
//! exposes the `/metrics` endpoint handler.

use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

// -- Metric name constants ----------------------------------------------------

/// Total HTTP requests (counter). Labels: method, path, status.
pub const HTTP_REQUESTS_TOTAL: &str = "qave_http_requests_total";

/// HTTP request duration in seconds (histogram). Labels: method, path.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "qave_http_request_duration_seconds";

/// Successful uploads (counter).
pub const UPLOADS_TOTAL: &str = "qave_uploads_total";

/// Bytes accepted by successful uploads (counter).
pub const UPLOADED_BYTES_TOTAL: &str = "qave_uploaded_bytes_total";

/// Completed sweep cycles (counter).
pub const SWEEP_CYCLES_TOTAL: &str = "qave_sweep_cycles_total";

/// Sweep cycles abandoned on a metadata store error (counter).
pub const SWEEP_FAILURES_TOTAL: &str = "qave_sweep_failures_total";

/// Leases transitioned to deleted by the sweeper (counter).
pub const LEASES_SWEPT_TOTAL: &str = "qave_leases_swept_total";

/// Physical piece deletions that failed after the lease was marked (counter).
pub const RECLAIM_FAILURES_TOTAL: &str = "qave_reclaim_failures_total";

// -- Global recorder installation ---------------------------------------------

/// Singleton handle to the Prometheus recorder.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus metrics recorder. Idempotent -- safe to call
/// multiple times (e.g. in tests). Returns a reference to the global handle.
pub fn init_metrics() -> &'static PrometheusHandle {
    PROMETHEUS_HANDLE.get_or_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .expect("failed to install Prometheus recorder")
    })
}

/// Register metric descriptions with the global recorder. Call once after
/// `init_metrics()`.
pub fn describe_metrics() {
    describe_counter!(HTTP_REQUESTS_TOTAL, "Total HTTP requests");
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_counter!(UPLOADS_TOTAL, "Total successful uploads");
    describe_counter!(UPLOADED_BYTES_TOTAL, "Total bytes accepted by uploads");
    describe_counter!(SWEEP_CYCLES_TOTAL, "Completed expiration sweep cycles");
    describe_counter!(SWEEP_FAILURES_TOTAL, "Abandoned expiration sweep cycles");
    describe_counter!(LEASES_SWEPT_TOTAL, "Leases marked deleted by the sweeper");
    describe_counter!(
        RECLAIM_FAILURES_TOTAL,
        "Failed physical deletions of swept pieces"
    );
}

// -- Metrics middleware -------------------------------------------------------

/// Axum middleware that records HTTP RED metrics for every request.
///
/// Excludes `/metrics` from self-instrumentation to avoid feedback loops.
pub async fn metrics_middleware(
    req: Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Response {
    if req.uri().path() == "/metrics" {
        return next.run(req).await;
    }

    let method = req.method().to_string();
    let path = normalize_path(req.uri().path());

    let start = Instant::now();
    let response = next.run(req).await;
    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "path" => path.clone(), "status" => status).increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => path).record(duration);

    response
}

// -- Path normalization -------------------------------------------------------

/// Normalize an actual request path to a route template for metric labels.
///
/// Object identifiers are collapsed so every download shares one label:
/// - `/object/3f2a...` -> `/object/{object_id}`
/// - anything unrouted -> `/{other}`
pub(crate) fn normalize_path(path: &str) -> String {
    match path {
        "/" | "/health" | "/openapi.json" | "/metrics" | "/upload" | "/objects"
        | "/dashboard" => path.to_string(),
        _ if path.starts_with("/object/") => "/object/{object_id}".to_string(),
        _ => "/{other}".to_string(),
    }
}

// -- Metrics endpoint handler -------------------------------------------------

/// `GET /metrics` -- Render Prometheus exposition format text.
pub async fn metrics_handler() -> impl IntoResponse {
    let handle = PROMETHEUS_HANDLE
        .get()
        .expect("Prometheus recorder not initialized");
    let body = handle.render();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        body,
    )
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_fixed_routes() {
        for path in ["/", "/health", "/openapi.json", "/upload", "/objects", "/dashboard"] {
            assert_eq!(normalize_path(path), path);
        }
    }

    #[test]
    fn test_normalize_path_object() {
        assert_eq!(
            normalize_path("/object/0b6f4d0e-7f1c-4c55-9f43-2d3c1a2b9e10"),
            "/object/{object_id}"
        );
    }

    #[test]
    fn test_normalize_path_unknown() {
        assert_eq!(normalize_path("/favicon.ico"), "/{other}");
        assert_eq!(normalize_path("/a/b/c"), "/{other}");
    }
}
