//! Object-level API handlers: upload, download and per-wallet listing.
//!
//! Handlers only translate between HTTP and the core.  Visibility is
//! always decided by [`derive_status`], never by comparing timestamps
//! here.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use garde::Validate;
use metrics::counter;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::errors::ApiError;
use crate::lifecycle::{derive_status, LeaseStatus, ObjectLease, StorageRef};
use crate::metadata::store::ObjectRecord;
use crate::metrics::{UPLOADED_BYTES_TOTAL, UPLOADS_TOTAL};
use crate::storage::adapter::{DataSetMeta, PieceCid, UploadOptions};
use crate::AppState;

/// Header carrying the caller's wallet identity.
pub const WALLET_HEADER: &str = "x-wallet";

// -- Request / response types -------------------------------------------------

/// Validated caller identity.
#[derive(Debug, Validate)]
pub struct WalletInput {
    /// Opaque wallet identifier, taken verbatim from `X-Wallet`.
    #[garde(length(min = 1, max = 256))]
    pub wallet: String,
}

/// Body returned by a successful upload.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UploadResponse {
    pub object_id: String,
    pub piece_cid: String,
    /// Bytes accepted by the storage backend.
    pub size: u64,
    pub expire_at: Option<DateTime<Utc>>,
}

/// One row of `GET /objects`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ObjectListing {
    pub object_id: String,
    pub lease_id: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub expire_at: Option<DateTime<Utc>>,
    pub status: LeaseStatus,
}

impl ObjectListing {
    /// Build a listing row, deriving the lease status now.
    pub fn from_lease(lease: ObjectLease, object: ObjectRecord) -> Self {
        Self {
            status: derive_status(&lease),
            object_id: lease.object_id,
            lease_id: lease.lease_id,
            size: object.size_bytes,
            created_at: lease.created_at,
            expire_at: lease.expire_at,
        }
    }
}

/// Extract and validate the `X-Wallet` header.
pub fn wallet_from_headers(headers: &HeaderMap) -> Result<String, ApiError> {
    let wallet = headers
        .get(WALLET_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_default();
    let input = WalletInput { wallet };
    input.validate().map_err(|_| ApiError::missing_wallet())?;
    Ok(input.wallet)
}

/// Data set every upload lands in.
fn upload_data_set() -> DataSetMeta {
    DataSetMeta {
        application: "Qave".to_string(),
        version: "1.0".to_string(),
        with_cdn: false,
    }
}

// -- Handlers -----------------------------------------------------------------

/// `POST /upload` -- Store the raw request body under a fresh lease.
#[utoipa::path(
    post,
    path = "/upload",
    tag = "Object",
    operation_id = "UploadObject",
    params(
        ("X-Wallet" = String, Header, description = "Owning wallet"),
    ),
    request_body(content = Vec<u8>, content_type = "application/octet-stream"),
    responses(
        (status = 200, description = "Object stored", body = UploadResponse),
        (status = 400, description = "Missing wallet", body = crate::errors::ErrorBody),
        (status = 413, description = "Upload too large", body = crate::errors::ErrorBody),
        (status = 502, description = "Storage backend failure", body = crate::errors::ErrorBody)
    )
)]
pub async fn upload_object(
    state: Arc<AppState>,
    headers: &HeaderMap,
    body: Body,
) -> Result<Response, ApiError> {
    let wallet = wallet_from_headers(headers)?;

    let limit = state.config.server.max_upload_size;
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if declared.is_some_and(|len| len > limit) {
        return Err(ApiError::PayloadTooLarge { limit });
    }
    // Any read failure is reported as oversize; the limit is the only
    // expected cause.
    let data = axum::body::to_bytes(body, usize::try_from(limit).unwrap_or(usize::MAX))
        .await
        .map_err(|_| ApiError::PayloadTooLarge { limit })?;

    // Adapter calls complete before any metadata is written.
    let data_set_id = state.storage.ensure_data_set(upload_data_set()).await?;
    let uploaded = state
        .storage
        .upload(
            &data_set_id,
            data,
            UploadOptions {
                file_name: "file".to_string(),
            },
        )
        .await?;

    let object_id = uuid::Uuid::new_v4().to_string();
    state.metadata.create_user_if_absent(&wallet).await?;
    state
        .metadata
        .create_data_set_if_absent(data_set_id.as_str(), &wallet)
        .await?;
    let object = state
        .metadata
        .create_object(&object_id, &wallet, data_set_id.as_str(), uploaded.size)
        .await?;

    let lease = ObjectLease::new(
        uuid::Uuid::new_v4().to_string(),
        object_id.clone(),
        wallet.clone(),
        object.created_at,
        state.config.lease.duration(),
        StorageRef {
            data_set_id: data_set_id.to_string(),
            piece_cid: uploaded.piece_cid.to_string(),
        },
    );
    let expire_at = lease.expire_at;
    state.metadata.create_lease(lease).await?;

    counter!(UPLOADS_TOTAL).increment(1);
    counter!(UPLOADED_BYTES_TOTAL).increment(uploaded.size);
    tracing::info!(
        object_id = %object_id,
        wallet = %wallet,
        size = uploaded.size,
        "object uploaded"
    );

    Ok(Json(UploadResponse {
        object_id,
        piece_cid: uploaded.piece_cid.0,
        size: uploaded.size,
        expire_at,
    })
    .into_response())
}

/// `GET /object/{object_id}` -- Stream back an active object's bytes.
#[utoipa::path(
    get,
    path = "/object/{object_id}",
    tag = "Object",
    operation_id = "GetObject",
    params(
        ("object_id" = String, Path, description = "Object identifier"),
    ),
    responses(
        (status = 200, description = "Object data", body = Vec<u8>, content_type = "application/octet-stream"),
        (status = 404, description = "Absent, expired or deleted", body = crate::errors::ErrorBody),
        (status = 502, description = "Storage backend failure", body = crate::errors::ErrorBody)
    )
)]
pub async fn get_object(state: Arc<AppState>, object_id: &str) -> Result<Response, ApiError> {
    let lease = state
        .metadata
        .find_lease_by_object_id(object_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    if derive_status(&lease) != LeaseStatus::Active {
        return Err(ApiError::NotFound);
    }

    let data = state
        .storage
        .download(&PieceCid(lease.storage_ref.piece_cid))
        .await?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/octet-stream")],
        data,
    )
        .into_response())
}

/// `GET /objects` -- Every lease owned by the caller, with derived status.
#[utoipa::path(
    get,
    path = "/objects",
    tag = "Object",
    operation_id = "ListObjects",
    params(
        ("X-Wallet" = String, Header, description = "Owning wallet"),
    ),
    responses(
        (status = 200, description = "Leases, newest first", body = Vec<ObjectListing>),
        (status = 400, description = "Missing wallet", body = crate::errors::ErrorBody)
    )
)]
pub async fn list_objects(state: Arc<AppState>, headers: &HeaderMap) -> Result<Response, ApiError> {
    let wallet = wallet_from_headers(headers)?;
    let rows = state.metadata.list_leases_by_owner(&wallet).await?;

    let listing: Vec<ObjectListing> = rows
        .into_iter()
        .map(|(lease, object)| ObjectListing::from_lease(lease, object))
        .collect();

    Ok(Json(listing).into_response())
}

// -- Tests --------------------------------------------------------------------
