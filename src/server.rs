//! Axum router construction and route mapping.
//!
//! The [`app`] function wires every endpoint to its handler and returns a
//! ready-to-serve [`axum::Router`].  Route functions here only extract
//! request parts; the work happens in [`crate::handlers`].

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Path, State},
    http::{HeaderMap, HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::errors::{generate_request_id, ApiError};
use crate::metrics::{metrics_handler, metrics_middleware, normalize_path};
use crate::AppState;

/// Response header echoing the per-request identifier.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

// -- OpenAPI document ---------------------------------------------------------

/// OpenAPI documentation for the Qave API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Qave API",
        version = "0.1.0",
        description = "Lease-based object storage service"
    ),
    paths(
        health_check,
        crate::handlers::object::upload_object,
        crate::handlers::object::get_object,
        crate::handlers::object::list_objects,
        crate::handlers::dashboard::get_dashboard,
    ),
    components(schemas(
        crate::errors::ErrorBody,
        crate::handlers::object::UploadResponse,
        crate::handlers::object::ObjectListing,
        crate::lifecycle::LeaseStatus,
        crate::lifecycle::StatusCounts,
        crate::metadata::store::AggregateStats,
    )),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Object", description = "Object upload, download and listing"),
        (name = "Dashboard", description = "Aggregate usage statistics"),
    )
)]
pub struct ApiDoc;

/// Build the axum [`Router`] with all routes.
///
/// The returned router is ready to be passed to `axum::serve`.
pub fn app(state: Arc<AppState>) -> Router {
    let metrics_enabled = state.config.observability.metrics;

    let mut router = Router::new()
        .route("/health", get(health_check))
        .route("/openapi.json", get(openapi_json))
        .route("/upload", post(handle_upload))
        .route("/object/:object_id", get(handle_get_object))
        .route("/objects", get(handle_list_objects))
        .route("/dashboard", get(handle_dashboard));
    if metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    let router = router
        .with_state(state)
        // Layer ordering: inner layers run first, outer layers wrap them.
        .layer(middleware::from_fn(request_context_middleware))
        .layer(TraceLayer::new_for_http())
        // The upload handler enforces its own configured limit.
        .layer(DefaultBodyLimit::disable());

    if metrics_enabled {
        // Outermost so it captures the full request lifecycle.
        router.layer(middleware::from_fn(metrics_middleware))
    } else {
        router
    }
}

// -- Request context middleware ----------------------------------------------

/// Tags every response with a request id plus `Date` and `Server` headers,
/// and logs method, normalized path, status and latency.
async fn request_context_middleware(req: Request<Body>, next: Next) -> Response {
    let request_id = generate_request_id();
    let method = req.method().clone();
    let path = normalize_path(req.uri().path());
    let start = Instant::now();

    let mut response = next.run(req).await;

    let latency_ms = start.elapsed().as_millis() as u64;
    tracing::info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms,
        "request completed"
    );

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        headers.insert(REQUEST_ID_HEADER, value);
    }
    let date = httpdate::fmt_http_date(std::time::SystemTime::now());
    if let Ok(value) = HeaderValue::from_str(&date) {
        headers.insert("date", value);
    }
    headers.insert("server", HeaderValue::from_static("Qave"));

    response
}

// -- Health check ------------------------------------------------------------

/// `GET /health` -- Returns `{"status": "ok"}` with 200 OK.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    operation_id = "HealthCheck",
    responses(
        (status = 200, description = "Health check OK")
    )
)]
async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "application/json")],
        r#"{"status":"ok"}"#,
    )
}

/// `GET /openapi.json` -- The generated OpenAPI document.
async fn openapi_json() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}

// -- Route extraction --------------------------------------------------------

/// `POST /upload`
async fn handle_upload(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, ApiError> {
    crate::handlers::object::upload_object(state, &headers, body).await
}

/// `GET /object/:object_id`
async fn handle_get_object(
    State(state): State<Arc<AppState>>,
    Path(object_id): Path<String>,
) -> Result<Response, ApiError> {
    crate::handlers::object::get_object(state, &object_id).await
}

/// `GET /objects`
async fn handle_list_objects(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    crate::handlers::object::list_objects(state, &headers).await
}

/// `GET /dashboard`
async fn handle_dashboard(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    crate::handlers::dashboard::get_dashboard(state).await
}
