//! In-memory storage adapter.
//!
//! Pieces live in a single `tokio::sync::RwLock<MockState>`.  Every
//! instance is independent, so tests construct one per case and inject
//! it into the server.

use bytes::Bytes;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use super::adapter::{
    DataSetId, DataSetMeta, PieceCid, StorageAdapter, StorageError, StorageResult, UploadOptions,
    UploadResult,
};

/// Data set identifier handed out by every mock adapter.
pub const MOCK_DATA_SET_ID: &str = "mock-ds-1";

#[derive(Debug, Default)]
struct MockState {
    pieces: HashMap<PieceCid, Bytes>,
    /// Monotonic, so a deleted piece's identifier is never reissued.
    next_piece: u64,
}

/// Storage adapter test double.
#[derive(Debug, Default)]
pub struct MockAdapter {
    state: tokio::sync::RwLock<MockState>,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pieces currently stored.
    pub async fn len(&self) -> usize {
        self.state.read().await.pieces.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Whether `piece_cid` is currently stored.
    pub async fn contains(&self, piece_cid: &PieceCid) -> bool {
        self.state.read().await.pieces.contains_key(piece_cid)
    }
}

impl StorageAdapter for MockAdapter {
    fn ensure_data_set(
        &self,
        _meta: DataSetMeta,
    ) -> Pin<Box<dyn Future<Output = StorageResult<DataSetId>> + Send + '_>> {
        Box::pin(async move { Ok(DataSetId(MOCK_DATA_SET_ID.to_string())) })
    }

    fn upload(
        &self,
        _data_set_id: &DataSetId,
        data: Bytes,
        _options: UploadOptions,
    ) -> Pin<Box<dyn Future<Output = StorageResult<UploadResult>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.state.write().await;
            state.next_piece += 1;
            let piece_cid = PieceCid(format!("mock-piece-{}", state.next_piece));
            let size = data.len() as u64;
            state.pieces.insert(piece_cid.clone(), data);
            Ok(UploadResult { piece_cid, size })
        })
    }

    fn download(
        &self,
        piece_cid: &PieceCid,
    ) -> Pin<Box<dyn Future<Output = StorageResult<Bytes>> + Send + '_>> {
        let piece_cid = piece_cid.clone();
        Box::pin(async move {
            let state = self.state.read().await;
            match state.pieces.get(&piece_cid) {
                Some(data) => Ok(data.clone()),
                None => Err(StorageError::NotFound { piece_cid }),
            }
        })
    }

    fn delete(
        &self,
        piece_cid: &PieceCid,
    ) -> Pin<Box<dyn Future<Output = StorageResult<()>> + Send + '_>> {
        let piece_cid = piece_cid.clone();
        Box::pin(async move {
            let mut state = self.state.write().await;
            match state.pieces.remove(&piece_cid) {
                Some(_) => Ok(()),
                None => Err(StorageError::NotFound { piece_cid }),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn meta() -> DataSetMeta {
        DataSetMeta {
            application: "test".to_string(),
            version: "1".to_string(),
            with_cdn: false,
        }
    }

    #[tokio::test]
    async fn test_upload_download_delete() {
        let adapter = MockAdapter::new();
        let ds = adapter.ensure_data_set(meta()).await.unwrap();
        assert_eq!(ds.as_str(), MOCK_DATA_SET_ID);

        let result = adapter
            .upload(&ds, Bytes::from_static(b"hello"), UploadOptions::default())
            .await
            .unwrap();
        assert_eq!(result.size, 5);
        assert_eq!(
            adapter.download(&result.piece_cid).await.unwrap(),
            Bytes::from_static(b"hello")
        );

        adapter.delete(&result.piece_cid).await.unwrap();
        assert!(matches!(
            adapter.download(&result.piece_cid).await,
            Err(StorageError::NotFound { .. })
        ));
        assert!(matches!(
            adapter.delete(&result.piece_cid).await,
            Err(StorageError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_piece_ids_not_reused_after_delete() {
        let adapter = MockAdapter::new();
        let ds = adapter.ensure_data_set(meta()).await.unwrap();
        let first = adapter
            .upload(&ds, Bytes::from_static(b"a"), UploadOptions::default())
            .await
            .unwrap();
        adapter.delete(&first.piece_cid).await.unwrap();
        let second = adapter
            .upload(&ds, Bytes::from_static(b"b"), UploadOptions::default())
            .await
            .unwrap();
        assert_ne!(first.piece_cid, second.piece_cid);
    }

    #[tokio::test]
    async fn test_instances_are_isolated() {
        let a = MockAdapter::new();
        let b = MockAdapter::new();
        let ds = a.ensure_data_set(meta()).await.unwrap();
        a.upload(&ds, Bytes::from_static(b"x"), UploadOptions::default())
            .await
            .unwrap();
        assert_eq!(a.len().await, 1);
        assert!(b.is_empty().await);
    }

    #[tokio::test]
    async fn test_concurrent_uploads_get_distinct_pieces() {
        let adapter = Arc::new(MockAdapter::new());
        let ds = adapter.ensure_data_set(meta()).await.unwrap();
        let mut handles = Vec::new();
        for i in 0..16u8 {
            let adapter = Arc::clone(&adapter);
            let ds = ds.clone();
            handles.push(tokio::spawn(async move {
                adapter
                    .upload(&ds, Bytes::from(vec![i; 4]), UploadOptions::default())
                    .await
                    .unwrap()
                    .piece_cid
            }));
        }
        let mut cids = Vec::new();
        for handle in handles {
            cids.push(handle.await.unwrap());
        }
        cids.sort_by(|a, b| a.0.cmp(&b.0));
        cids.dedup();
        assert_eq!(cids.len(), 16);
        assert_eq!(adapter.len().await, 16);
    }
}
