//! Qave library: lease-based object storage.
//!
//! Uploaded objects are stored through a pluggable storage adapter and
//! stay readable for a fixed lease window.  Expired leases become
//! invisible immediately and are reclaimed by a background sweeper.

use std::sync::Arc;

pub mod config;
pub mod errors;
pub mod handlers;
pub mod lifecycle;
pub mod metadata;
pub mod metrics;
pub mod server;
pub mod storage;
pub mod sweeper;

use crate::config::Config;
use crate::metadata::store::MetadataStore;
use crate::storage::adapter::StorageAdapter;

/// Shared application state passed to all handlers via `axum::extract::State`.
pub struct AppState {
    /// Service configuration.
    pub config: Config,
    /// Metadata store (SQLite or in-memory).
    pub metadata: Arc<dyn MetadataStore>,
    /// Piece storage adapter (mock or local filesystem).
    pub storage: Arc<dyn StorageAdapter>,
}
