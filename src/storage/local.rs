//! Local filesystem storage adapter.
//!
//! Pieces are content-addressed by SHA-256.  Identical payloads share one
//! data file; each upload gets its own reference so deleting one piece
//! never removes bytes another piece still points at:
//!
//! ```text
//! <root>/datasets/<data_set_id>/
//! <root>/pieces/<sha256>/data
//! <root>/pieces/<sha256>/<ref>.ref
//! <root>/.tmp/
//! ```
//!
//! The piece identifier is `<sha256>.<ref>`.  Writes follow the
//! temp-file, fsync, rename pattern.

use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::ffi::OsStr;
use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::pin::Pin;

use super::adapter::{
    DataSetId, DataSetMeta, PieceCid, StorageAdapter, StorageError, StorageResult, UploadOptions,
    UploadResult,
};

/// Stores pieces on the local filesystem.
pub struct LocalAdapter {
    /// Root directory for all stored pieces.
    root: PathBuf,
    /// Serializes uploads and deletes so reference counting stays exact.
    write_lock: tokio::sync::Mutex<()>,
}

impl LocalAdapter {
    /// Create a new `LocalAdapter` rooted at `root`.
    ///
    /// The directory layout is created if it does not exist.
    pub fn new(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join("datasets"))?;
        std::fs::create_dir_all(root.join("pieces"))?;
        std::fs::create_dir_all(root.join(".tmp"))?;
        Ok(Self {
            root,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    fn data_set_dir(&self, data_set_id: &DataSetId) -> PathBuf {
        self.root.join("datasets").join(data_set_id.as_str())
    }

    fn piece_dir(&self, hash: &str) -> PathBuf {
        self.root.join("pieces").join(hash)
    }

    fn temp_path(&self) -> PathBuf {
        let id = uuid::Uuid::new_v4();
        self.root.join(".tmp").join(format!("tmp-{id}"))
    }

    /// Split a piece identifier into `(hash, ref)`, rejecting anything
    /// that is not two hex components (which also rules out path traversal).
    fn parse_piece_cid(piece_cid: &PieceCid) -> StorageResult<(&str, &str)> {
        let not_found = || StorageError::NotFound {
            piece_cid: piece_cid.clone(),
        };
        let (hash, reference) = piece_cid.as_str().split_once('.').ok_or_else(not_found)?;
        let is_hex = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_hexdigit());
        if hash.len() != 64 || !is_hex(hash) || !is_hex(reference) {
            return Err(not_found());
        }
        Ok((hash, reference))
    }

    /// Write `data` to `path` atomically.
    fn write_atomic(&self, path: &std::path::Path, data: &[u8]) -> std::io::Result<()> {
        let tmp_path = self.temp_path();
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        std::fs::rename(&tmp_path, path)
    }
}

/// Derive a filesystem-safe data set identifier from its metadata.
fn data_set_id_for(meta: &DataSetMeta) -> DataSetId {
    let raw = format!(
        "{}-{}{}",
        meta.application,
        meta.version,
        if meta.with_cdn { "-cdn" } else { "" }
    );
    let id = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    DataSetId(id)
}

impl StorageAdapter for LocalAdapter {
    fn ensure_data_set(
        &self,
        meta: DataSetMeta,
    ) -> Pin<Box<dyn Future<Output = StorageResult<DataSetId>> + Send + '_>> {
        Box::pin(async move {
            let id = data_set_id_for(&meta);
            std::fs::create_dir_all(self.data_set_dir(&id))?;
            Ok(id)
        })
    }

    fn upload(
        &self,
        data_set_id: &DataSetId,
        data: Bytes,
        _options: UploadOptions,
    ) -> Pin<Box<dyn Future<Output = StorageResult<UploadResult>> + Send + '_>> {
        let data_set_id = data_set_id.clone();
        Box::pin(async move {
            if !self.data_set_dir(&data_set_id).is_dir() {
                return Err(StorageError::Backend(anyhow::anyhow!(
                    "unknown data set: {data_set_id}"
                )));
            }

            let hash = hex::encode(Sha256::digest(&data));
            let reference = uuid::Uuid::new_v4().simple().to_string();

            let _guard = self.write_lock.lock().await;
            let dir = self.piece_dir(&hash);
            std::fs::create_dir_all(&dir)?;
            let data_path = dir.join("data");
            if !data_path.exists() {
                self.write_atomic(&data_path, &data)?;
            }
            self.write_atomic(&dir.join(format!("{reference}.ref")), &[])?;

            tracing::debug!(hash = %hash, data_set = %data_set_id, "stored piece");
            Ok(UploadResult {
                piece_cid: PieceCid(format!("{hash}.{reference}")),
                size: data.len() as u64,
            })
        })
    }

    fn download(
        &self,
        piece_cid: &PieceCid,
    ) -> Pin<Box<dyn Future<Output = StorageResult<Bytes>> + Send + '_>> {
        let piece_cid = piece_cid.clone();
        Box::pin(async move {
            let (hash, reference) = Self::parse_piece_cid(&piece_cid)?;
            let dir = self.piece_dir(hash);
            if !dir.join(format!("{reference}.ref")).exists() {
                return Err(StorageError::NotFound {
                    piece_cid: piece_cid.clone(),
                });
            }
            match std::fs::read(dir.join("data")) {
                Ok(data) => Ok(Bytes::from(data)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    Err(StorageError::NotFound {
                        piece_cid: piece_cid.clone(),
                    })
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    fn delete(
        &self,
        piece_cid: &PieceCid,
    ) -> Pin<Box<dyn Future<Output = StorageResult<()>> + Send + '_>> {
        let piece_cid = piece_cid.clone();
        Box::pin(async move {
            let (hash, reference) = Self::parse_piece_cid(&piece_cid)?;
            let _guard = self.write_lock.lock().await;
            let dir = self.piece_dir(hash);
            match std::fs::remove_file(dir.join(format!("{reference}.ref"))) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(StorageError::NotFound {
                        piece_cid: piece_cid.clone(),
                    });
                }
                Err(e) => return Err(e.into()),
            }

            let has_refs = std::fs::read_dir(&dir)?
                .filter_map(Result::ok)
                .any(|entry| entry.path().extension() == Some(OsStr::new("ref")));
            if !has_refs {
                std::fs::remove_dir_all(&dir)?;
                tracing::debug!(hash = %hash, "reclaimed piece data");
            }
            Ok(())
        })
    }
}
