//! Expiration sweeper.
//!
//! A single background task that periodically reclaims leases whose
//! `expire_at` has passed.  Each cycle marks the lease deleted in the
//! metadata store first and only then asks the storage adapter to drop
//! the piece, so the metadata mark is authoritative even when physical
//! deletion fails.
//!
//! Cycles run inline in one task and late ticks are delayed rather than
//! bunched, so two cycles never overlap.  The loop stops when the
//! shutdown channel flips to `true` (or its sender is dropped), checking
//! before every sleep and again before starting a cycle.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::lifecycle::{derive_status_at, LeaseStatus};
use crate::metadata::store::{MetadataStore, StoreResult};
use crate::metrics::{
    LEASES_SWEPT_TOTAL, RECLAIM_FAILURES_TOTAL, SWEEP_CYCLES_TOTAL, SWEEP_FAILURES_TOTAL,
};
use crate::storage::adapter::{PieceCid, StorageAdapter, StorageError};

/// Outcome of one sweep cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Leases returned by the expired-unswept scan.
    pub examined: usize,
    /// Leases this cycle transitioned to deleted.
    pub swept: usize,
    /// Pieces physically removed, or already absent.
    pub reclaimed: usize,
    /// Pieces whose physical deletion failed.
    pub reclaim_failures: usize,
}

/// Periodic reclaimer of expired leases.
pub struct Sweeper {
    metadata: Arc<dyn MetadataStore>,
    /// `None` runs metadata-only cycles (the offline CLI).
    storage: Option<Arc<dyn StorageAdapter>>,
    interval: Duration,
}

impl Sweeper {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        storage: Arc<dyn StorageAdapter>,
        interval: Duration,
    ) -> Self {
        Self {
            metadata,
            storage: Some(storage),
            interval,
        }
    }

    /// A sweeper that only marks leases deleted and never touches storage.
    pub fn metadata_only(metadata: Arc<dyn MetadataStore>, interval: Duration) -> Self {
        Self {
            metadata,
            storage: None,
            interval,
        }
    }

    /// Run one sweep cycle against the current time.
    pub async fn run_cycle(&self) -> StoreResult<SweepReport> {
        self.run_cycle_at(Utc::now()).await
    }

    /// Run one sweep cycle as of `now`.
    ///
    /// A metadata store error abandons the rest of the cycle; the next
    /// cycle picks up whatever is left since marking is idempotent.
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> StoreResult<SweepReport> {
        let leases = self.metadata.find_expired_unswept(now).await?;
        let mut report = SweepReport {
            examined: leases.len(),
            ..SweepReport::default()
        };

        for lease in leases {
            if derive_status_at(&lease, now) != LeaseStatus::Expired {
                continue;
            }
            if !self.metadata.mark_deleted(&lease.lease_id, now).await? {
                // Someone else got there first.
                continue;
            }
            report.swept += 1;
            counter!(LEASES_SWEPT_TOTAL).increment(1);
            tracing::info!(
                lease_id = %lease.lease_id,
                object_id = %lease.object_id,
                piece_cid = %lease.storage_ref.piece_cid,
                "lease swept"
            );

            let Some(storage) = &self.storage else {
                continue;
            };
            let piece_cid = PieceCid(lease.storage_ref.piece_cid.clone());
            match storage.delete(&piece_cid).await {
                Ok(()) => report.reclaimed += 1,
                Err(StorageError::NotFound { .. }) => {
                    tracing::debug!(piece_cid = %piece_cid, "piece already gone");
                    report.reclaimed += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        lease_id = %lease.lease_id,
                        piece_cid = %piece_cid,
                        error = %e,
                        "failed to reclaim piece"
                    );
                    counter!(RECLAIM_FAILURES_TOTAL).increment(1);
                    report.reclaim_failures += 1;
                }
            }
        }

        Ok(report)
    }

    /// Run one cycle and swallow its error into logs and metrics.
    async fn tick(&self) {
        match self.run_cycle().await {
            Ok(report) => {
                counter!(SWEEP_CYCLES_TOTAL).increment(1);
                if report.examined > 0 {
                    tracing::debug!(?report, "sweep cycle finished");
                }
            }
            Err(e) => {
                counter!(SWEEP_FAILURES_TOTAL).increment(1);
                tracing::warn!(error = %e, "sweep cycle failed, retrying next interval");
            }
        }
    }

    /// Start the background loop.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(
                interval_ms = self.interval.as_millis() as u64,
                "sweeper started"
            );
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; skip it.
            ticker.tick().await;

            loop {
                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    _ = ticker.tick() => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                        continue;
                    }
                }
                if *shutdown.borrow() {
                    break;
                }
                self.tick().await;
            }

            tracing::info!("sweeper stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{ObjectLease, StorageRef};
    use crate::metadata::memory::MemoryMetadataStore;
    use crate::storage::adapter::{
        DataSetId, DataSetMeta, StorageResult, UploadOptions, UploadResult,
    };
    use crate::storage::mock::MockAdapter;
    use bytes::Bytes;
    use chrono::Duration as ChronoDuration;
    use std::future::Future;
    use std::pin::Pin;

    fn lease(id: &str, piece_cid: &str, expire_at: Option<DateTime<Utc>>) -> ObjectLease {
        ObjectLease {
            lease_id: id.to_string(),
            object_id: format!("obj-{id}"),
            wallet: "w1".to_string(),
            created_at: Utc::now() - ChronoDuration::days(31),
            expire_at,
            tombstoned_at: None,
            deleted_at: None,
            storage_ref: StorageRef {
                data_set_id: "mock-ds-1".to_string(),
                piece_cid: piece_cid.to_string(),
            },
        }
    }

    async fn upload(adapter: &MockAdapter) -> String {
        let ds = adapter
            .ensure_data_set(DataSetMeta {
                application: "Qave".to_string(),
                version: "1.0".to_string(),
                with_cdn: false,
            })
            .await
            .unwrap();
        adapter
            .upload(&ds, Bytes::from_static(b"payload"), UploadOptions::default())
            .await
            .unwrap()
            .piece_cid
            .0
    }

    /// Adapter whose deletes always fail with a backend error.
    struct BrokenDeletes;

    impl StorageAdapter for BrokenDeletes {
        fn ensure_data_set(
            &self,
            _meta: DataSetMeta,
        ) -> Pin<Box<dyn Future<Output = StorageResult<DataSetId>> + Send + '_>> {
            Box::pin(async { Ok(DataSetId("ds".to_string())) })
        }

        fn upload(
            &self,
            _data_set_id: &DataSetId,
            _data: Bytes,
            _options: UploadOptions,
        ) -> Pin<Box<dyn Future<Output = StorageResult<UploadResult>> + Send + '_>> {
            Box::pin(async { Err(StorageError::Backend(anyhow::anyhow!("read-only"))) })
        }

        fn download(
            &self,
            piece_cid: &PieceCid,
        ) -> Pin<Box<dyn Future<Output = StorageResult<Bytes>> + Send + '_>> {
            let piece_cid = piece_cid.clone();
            Box::pin(async move { Err(StorageError::NotFound { piece_cid }) })
        }

        fn delete(
            &self,
            _piece_cid: &PieceCid,
        ) -> Pin<Box<dyn Future<Output = StorageResult<()>> + Send + '_>> {
            Box::pin(async { Err(StorageError::Backend(anyhow::anyhow!("backend down"))) })
        }
    }

    #[tokio::test]
    async fn test_cycle_converges_and_reclaims() {
        let metadata = Arc::new(MemoryMetadataStore::new());
        let storage = Arc::new(MockAdapter::new());
        let now = Utc::now();

        for i in 0..5 {
            let cid = upload(&storage).await;
            metadata
                .create_lease(lease(&format!("l{i}"), &cid, Some(now - ChronoDuration::hours(1))))
                .await
                .unwrap();
        }

        let sweeper = Sweeper::new(metadata.clone(), storage.clone(), Duration::from_secs(5));
        let report = sweeper.run_cycle_at(now).await.unwrap();
        assert_eq!(report.examined, 5);
        assert_eq!(report.swept, 5);
        assert_eq!(report.reclaimed, 5);
        assert!(metadata.find_expired_unswept(now).await.unwrap().is_empty());
        assert!(storage.is_empty().await);

        for i in 0..5 {
            let stored = metadata.get_lease(&format!("l{i}")).await.unwrap().unwrap();
            assert_eq!(stored.deleted_at, Some(now));
            assert_eq!(derive_status_at(&stored, now), LeaseStatus::Deleted);
        }

        let again = sweeper.run_cycle_at(now).await.unwrap();
        assert_eq!(again, SweepReport::default());
    }

    #[tokio::test]
    async fn test_cycle_leaves_active_and_unbounded_leases() {
        let metadata = Arc::new(MemoryMetadataStore::new());
        let storage = Arc::new(MockAdapter::new());
        let now = Utc::now();

        let active_cid = upload(&storage).await;
        metadata
            .create_lease(lease("active", &active_cid, Some(now + ChronoDuration::days(1))))
            .await
            .unwrap();
        let forever_cid = upload(&storage).await;
        metadata
            .create_lease(lease("forever", &forever_cid, None))
            .await
            .unwrap();

        let sweeper = Sweeper::new(metadata.clone(), storage.clone(), Duration::from_secs(5));
        let report = sweeper.run_cycle_at(now).await.unwrap();
        assert_eq!(report.swept, 0);
        assert!(storage.contains(&PieceCid(active_cid)).await);
        assert!(storage.contains(&PieceCid(forever_cid)).await);
        assert!(metadata
            .get_lease("active")
            .await
            .unwrap()
            .unwrap()
            .deleted_at
            .is_none());
    }

    #[tokio::test]
    async fn test_boundary_expiry_is_swept() {
        let metadata = Arc::new(MemoryMetadataStore::new());
        let storage = Arc::new(MockAdapter::new());
        let now = Utc::now();
        let cid = upload(&storage).await;
        metadata
            .create_lease(lease("edge", &cid, Some(now)))
            .await
            .unwrap();

        let sweeper = Sweeper::new(metadata.clone(), storage, Duration::from_secs(5));
        assert_eq!(sweeper.run_cycle_at(now).await.unwrap().swept, 1);
    }

    #[tokio::test]
    async fn test_missing_piece_counts_as_reclaimed() {
        let metadata = Arc::new(MemoryMetadataStore::new());
        let storage = Arc::new(MockAdapter::new());
        let now = Utc::now();
        metadata
            .create_lease(lease("l1", "mock-piece-404", Some(now - ChronoDuration::seconds(1))))
            .await
            .unwrap();

        let sweeper = Sweeper::new(metadata, storage, Duration::from_secs(5));
        let report = sweeper.run_cycle_at(now).await.unwrap();
        assert_eq!(report.swept, 1);
        assert_eq!(report.reclaimed, 1);
        assert_eq!(report.reclaim_failures, 0);
    }

    #[tokio::test]
    async fn test_reclaim_failure_keeps_lease_deleted() {
        let metadata = Arc::new(MemoryMetadataStore::new());
        let now = Utc::now();
        metadata
            .create_lease(lease("l1", "p1", Some(now - ChronoDuration::seconds(1))))
            .await
            .unwrap();

        let sweeper = Sweeper::new(metadata.clone(), Arc::new(BrokenDeletes), Duration::from_secs(5));
        let report = sweeper.run_cycle_at(now).await.unwrap();
        assert_eq!(report.swept, 1);
        assert_eq!(report.reclaim_failures, 1);
        assert!(metadata
            .get_lease("l1")
            .await
            .unwrap()
            .unwrap()
            .deleted_at
            .is_some());
    }

    #[tokio::test]
    async fn test_metadata_only_cycle() {
        let metadata = Arc::new(MemoryMetadataStore::new());
        let now = Utc::now();
        metadata
            .create_lease(lease("l1", "p1", Some(now - ChronoDuration::seconds(1))))
            .await
            .unwrap();

        let sweeper = Sweeper::metadata_only(metadata, Duration::from_secs(5));
        let report = sweeper.run_cycle_at(now).await.unwrap();
        assert_eq!(report.swept, 1);
        assert_eq!(report.reclaimed, 0);
    }

    #[tokio::test]
    async fn test_spawned_loop_sweeps_and_stops() {
        let metadata = Arc::new(MemoryMetadataStore::new());
        let storage = Arc::new(MockAdapter::new());
        let cid = upload(&storage).await;
        metadata
            .create_lease(lease("l1", &cid, Some(Utc::now() - ChronoDuration::seconds(1))))
            .await
            .unwrap();

        let sweeper = Arc::new(Sweeper::new(
            metadata.clone(),
            storage.clone(),
            Duration::from_millis(20),
        ));
        let (tx, rx) = watch::channel(false);
        let handle = sweeper.spawn(rx);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let stored = metadata.get_lease("l1").await.unwrap().unwrap();
            if stored.deleted_at.is_some() {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "lease never swept");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(storage.is_empty().await);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_before_first_cycle() {
        let metadata = Arc::new(MemoryMetadataStore::new());
        let sweeper = Arc::new(Sweeper::new(
            metadata,
            Arc::new(MockAdapter::new()),
            Duration::from_secs(3600),
        ));
        let (tx, rx) = watch::channel(false);
        let handle = sweeper.spawn(rx);
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_dropped_sender_stops_loop() {
        let sweeper = Arc::new(Sweeper::metadata_only(
            Arc::new(MemoryMetadataStore::new()),
            Duration::from_secs(3600),
        ));
        let (tx, rx) = watch::channel(false);
        let handle = sweeper.spawn(rx);
        drop(tx);
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }
}
