//! Abstract storage adapter trait.
//!
//! Every storage backend must implement [`StorageAdapter`].  Pieces are
//! content-addressed: the adapter chooses the [`PieceCid`] at upload
//! time and callers only ever refer to bytes through it.  The adapter has
//! no notion of leases or expiry.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Opaque backend container identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataSetId(pub String);

/// Opaque content-addressed piece identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PieceCid(pub String);

impl DataSetId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PieceCid {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DataSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for PieceCid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Describes the data set an upload should land in.
#[derive(Debug, Clone)]
pub struct DataSetMeta {
    pub application: String,
    pub version: String,
    pub with_cdn: bool,
}

/// Per-upload options.
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub file_name: String,
}

/// Outcome of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResult {
    pub piece_cid: PieceCid,
    /// Bytes accepted by the backend.
    pub size: u64,
}

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No piece is stored under this identifier.
    #[error("piece not found: {piece_cid}")]
    NotFound { piece_cid: PieceCid },

    /// Any other backend failure. Retryability is not distinguished.
    #[error("storage backend failure: {0}")]
    Backend(#[from] anyhow::Error),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Backend(err.into())
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Async content-addressed storage contract.
pub trait StorageAdapter: Send + Sync + 'static {
    /// Return the data set uploads described by `meta` belong to,
    /// creating it if needed.
    fn ensure_data_set(
        &self,
        meta: DataSetMeta,
    ) -> Pin<Box<dyn Future<Output = StorageResult<DataSetId>> + Send + '_>>;

    /// Store `data` in `data_set_id`, returning its piece identifier.
    fn upload(
        &self,
        data_set_id: &DataSetId,
        data: Bytes,
        options: UploadOptions,
    ) -> Pin<Box<dyn Future<Output = StorageResult<UploadResult>> + Send + '_>>;

    /// Read the full piece.
    fn download(
        &self,
        piece_cid: &PieceCid,
    ) -> Pin<Box<dyn Future<Output = StorageResult<Bytes>> + Send + '_>>;

    /// Delete the piece. [`StorageError::NotFound`] if it is not stored.
    fn delete(
        &self,
        piece_cid: &PieceCid,
    ) -> Pin<Box<dyn Future<Output = StorageResult<()>> + Send + '_>>;
}
