//! Dashboard aggregate handler.

use std::sync::Arc;

use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;

use crate::errors::ApiError;
use crate::metadata::store::AggregateStats;
use crate::AppState;

/// `GET /dashboard` -- Service-wide usage and lease counts.
#[utoipa::path(
    get,
    path = "/dashboard",
    tag = "Dashboard",
    operation_id = "GetDashboard",
    responses(
        (status = 200, description = "Aggregate statistics", body = AggregateStats),
        (status = 500, description = "Internal error", body = crate::errors::ErrorBody)
    )
)]
pub async fn get_dashboard(state: Arc<AppState>) -> Result<Response, ApiError> {
    let stats = state.metadata.compute_stats(Utc::now()).await?;
    Ok(Json(stats).into_response())
}
