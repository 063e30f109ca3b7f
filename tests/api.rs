//! Router-level tests: drive the full axum app with `tower::ServiceExt`.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tower::ServiceExt;

use qave::config::Config;
use qave::lifecycle::{ObjectLease, StorageRef};
use qave::metadata::memory::MemoryMetadataStore;
use qave::metadata::store::MetadataStore;
use qave::storage::mock::MockAdapter;
use qave::sweeper::Sweeper;
use qave::AppState;

struct Harness {
    app: Router,
    metadata: Arc<MemoryMetadataStore>,
    storage: Arc<MockAdapter>,
}

fn harness_with(config: Config) -> Harness {
    let metadata = Arc::new(MemoryMetadataStore::new());
    let storage = Arc::new(MockAdapter::new());
    let state = Arc::new(AppState {
        config,
        metadata: metadata.clone(),
        storage: storage.clone(),
    });
    Harness {
        app: qave::server::app(state),
        metadata,
        storage,
    }
}

fn harness() -> Harness {
    let mut config = Config::default();
    config.observability.metrics = false;
    harness_with(config)
}

fn upload_request(wallet: Option<&str>, body: Vec<u8>) -> Request<Body> {
    let mut builder = Request::builder().method("POST").uri("/upload");
    if let Some(wallet) = wallet {
        builder = builder.header("X-Wallet", wallet);
    }
    builder.body(Body::from(body)).unwrap()
}

fn get(uri: &str, wallet: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(wallet) = wallet {
        builder = builder.header("X-Wallet", wallet);
    }
    builder.body(Body::empty()).unwrap()
}

async fn body_bytes(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Insert an object and a lease directly into the store.
async fn seed_lease(
    metadata: &MemoryMetadataStore,
    object_id: &str,
    wallet: &str,
    expire_at: Option<DateTime<Utc>>,
) {
    metadata
        .create_object(object_id, wallet, "mock-ds-1", 10)
        .await
        .unwrap();
    metadata
        .create_lease(ObjectLease {
            lease_id: format!("lease-{object_id}"),
            object_id: object_id.to_string(),
            wallet: wallet.to_string(),
            created_at: Utc::now() - Duration::days(30),
            expire_at,
            tombstoned_at: None,
            deleted_at: None,
            storage_ref: StorageRef {
                data_set_id: "mock-ds-1".to_string(),
                piece_cid: format!("piece-{object_id}"),
            },
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_health() {
    let h = harness();
    let response = h.app.oneshot(get("/health", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ok");
}

#[tokio::test]
async fn test_openapi_document_served() {
    let h = harness();
    let response = h.app.oneshot(get("/openapi.json", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let doc = body_json(response).await;
    assert!(doc["paths"]["/upload"].is_object());
}

#[tokio::test]
async fn test_upload_download_list_roundtrip() {
    let h = harness();
    let payload: Vec<u8> = (0..1024u32).map(|i| (i % 251) as u8).collect();

    let before = Utc::now();
    let response = h
        .app
        .clone()
        .oneshot(upload_request(Some("w1"), payload.clone()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let request_id = response
        .headers()
        .get("x-request-id")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert_eq!(request_id.len(), 16);

    let uploaded = body_json(response).await;
    assert_eq!(uploaded["size"], 1024);
    assert!(uploaded["piece_cid"].as_str().unwrap().starts_with("mock-piece-"));
    let object_id = uploaded["object_id"].as_str().unwrap().to_string();
    let expire_at: DateTime<Utc> = uploaded["expire_at"].as_str().unwrap().parse().unwrap();
    let lower = before + Duration::days(30);
    let upper = Utc::now() + Duration::days(30);
    assert!(expire_at >= lower && expire_at <= upper);

    let stored = h
        .metadata
        .find_lease_by_object_id(&object_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.expire_at, Some(stored.created_at + Duration::days(30)));
    assert_eq!(stored.expire_at, Some(expire_at));

    let response = h
        .app
        .clone()
        .oneshot(get(&format!("/object/{object_id}"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, payload);

    let response = h.app.clone().oneshot(get("/objects", Some("w1"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let listing = body_json(response).await;
    let rows = listing.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["object_id"], object_id.as_str());
    assert_eq!(rows[0]["size"], 1024);
    assert_eq!(rows[0]["status"], "active");

    // Metadata records were created for the new wallet.
    let stats = h.metadata.compute_stats(Utc::now()).await.unwrap();
    assert_eq!(stats.total_users, 1);
    assert_eq!(stats.total_storage_bytes, 1024);
    assert_eq!(stats.leases.active, 1);
}

#[tokio::test]
async fn test_upload_without_wallet_rejected() {
    let h = harness();
    let response = h
        .app
        .oneshot(upload_request(None, b"data".to_vec()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "missing_wallet");
    assert!(h.storage.is_empty().await);
}

#[tokio::test]
async fn test_list_without_wallet_rejected() {
    let h = harness();
    let response = h.app.oneshot(get("/objects", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_upload_over_limit_rejected() {
    let mut config = Config::default();
    config.observability.metrics = false;
    config.server.max_upload_size = 16;
    let h = harness_with(config);

    let response = h
        .app
        .clone()
        .oneshot(upload_request(Some("w1"), vec![0u8; 17]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body_json(response).await["error"], "payload_too_large");
    assert!(h.storage.is_empty().await);

    let response = h
        .app
        .oneshot(upload_request(Some("w1"), vec![0u8; 16]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_expired_and_unknown_objects_look_the_same() {
    let h = harness();
    seed_lease(&h.metadata, "old", "w1", Some(Utc::now() - Duration::seconds(1))).await;

    let expired = h.app.clone().oneshot(get("/object/old", None)).await.unwrap();
    assert_eq!(expired.status(), StatusCode::NOT_FOUND);
    let expired_body = body_json(expired).await;

    let unknown = h.app.clone().oneshot(get("/object/nope", None)).await.unwrap();
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(unknown).await, expired_body);
    assert_eq!(expired_body["error"], "not_found");

    let listing = body_json(h.app.oneshot(get("/objects", Some("w1"))).await.unwrap()).await;
    assert_eq!(listing[0]["status"], "expired");
}

#[tokio::test]
async fn test_swept_object_is_gone() {
    let h = harness();
    let response = h
        .app
        .clone()
        .oneshot(upload_request(Some("w1"), b"short-lived".to_vec()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let uploaded = body_json(response).await;
    let object_id = uploaded["object_id"].as_str().unwrap().to_string();

    // Sweep as of a moment past the lease window.
    let sweeper = Sweeper::new(
        h.metadata.clone(),
        h.storage.clone(),
        StdDuration::from_secs(5),
    );
    let report = sweeper
        .run_cycle_at(Utc::now() + Duration::days(31))
        .await
        .unwrap();
    assert_eq!(report.swept, 1);
    assert_eq!(report.reclaimed, 1);
    assert!(h.storage.is_empty().await);

    let response = h
        .app
        .clone()
        .oneshot(get(&format!("/object/{object_id}"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let listing = body_json(h.app.oneshot(get("/objects", Some("w1"))).await.unwrap()).await;
    assert_eq!(listing[0]["status"], "deleted");
}

#[tokio::test]
async fn test_dashboard_expiring_window() {
    let h = harness();
    seed_lease(&h.metadata, "soon", "w1", Some(Utc::now() + Duration::days(3))).await;
    seed_lease(&h.metadata, "later", "w1", Some(Utc::now() + Duration::days(8))).await;
    seed_lease(&h.metadata, "past", "w2", Some(Utc::now() - Duration::days(1))).await;

    let response = h.app.oneshot(get("/dashboard", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let stats = body_json(response).await;
    assert_eq!(stats["expiring_in_7_days"], 1);
    assert_eq!(stats["total_storage_bytes"], 30);
    assert_eq!(stats["leases"]["active"], 2);
    assert_eq!(stats["leases"]["expired"], 1);
    assert_eq!(stats["leases"]["deleted"], 0);
}

#[tokio::test]
async fn test_other_wallets_see_nothing() {
    let h = harness();
    let response = h
        .app
        .clone()
        .oneshot(upload_request(Some("w1"), b"mine".to_vec()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let listing = body_json(h.app.oneshot(get("/objects", Some("w2"))).await.unwrap()).await;
    assert_eq!(listing, Value::Array(Vec::new()));
}

#[tokio::test]
async fn test_concurrent_uploads() {
    let h = harness();
    let mut handles = Vec::new();
    for i in 0..20u8 {
        let app = h.app.clone();
        handles.push(tokio::spawn(async move {
            let response = app
                .oneshot(upload_request(Some("w1"), vec![i; 64]))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            body_json(response).await["object_id"]
                .as_str()
                .unwrap()
                .to_string()
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap());
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 20);
    assert_eq!(h.storage.len().await, 20);

    let listing = body_json(h.app.oneshot(get("/objects", Some("w1"))).await.unwrap()).await;
    assert_eq!(listing.as_array().unwrap().len(), 20);

    let stats = h.metadata.compute_stats(Utc::now()).await.unwrap();
    assert_eq!(stats.total_users, 1);
    assert_eq!(stats.total_storage_bytes, 20 * 64);
}
