//! In-memory metadata store.
//!
//! Stores all metadata in memory with no persistence. Useful for testing
//! and ephemeral deployments. Uses `RwLock<Inner>` for thread-safe access;
//! every operation takes the lock once, so writes are never torn.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use super::store::{
    start_of_utc_day, AggregateStats, DataSetRecord, MetadataStore, ObjectRecord, StoreError,
    StoreResult, UserRecord,
};
use crate::lifecycle::ObjectLease;

#[derive(Debug, Default)]
struct Inner {
    users: HashMap<String, UserRecord>,
    data_sets: HashMap<String, DataSetRecord>,
    objects: HashMap<String, ObjectRecord>,
    leases: HashMap<String, ObjectLease>,
}

/// Newest first, ties broken by lease id descending.
fn newest_first(a: &ObjectLease, b: &ObjectLease) -> std::cmp::Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| b.lease_id.cmp(&a.lease_id))
}

#[derive(Default)]
pub struct MemoryMetadataStore {
    inner: RwLock<Inner>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetadataStore for MemoryMetadataStore {
    fn create_user_if_absent(
        &self,
        wallet: &str,
    ) -> Pin<Box<dyn Future<Output = StoreResult<()>> + Send + '_>> {
        let wallet = wallet.to_string();
        Box::pin(async move {
            let mut inner = self.inner.write().expect("rwlock poisoned");
            inner
                .users
                .entry(wallet.clone())
                .or_insert_with(|| UserRecord {
                    wallet,
                    created_at: Utc::now(),
                });
            Ok(())
        })
    }

    fn create_data_set_if_absent(
        &self,
        data_set_id: &str,
        wallet: &str,
    ) -> Pin<Box<dyn Future<Output = StoreResult<()>> + Send + '_>> {
        let data_set_id = data_set_id.to_string();
        let wallet = wallet.to_string();
        Box::pin(async move {
            let mut inner = self.inner.write().expect("rwlock poisoned");
            inner
                .data_sets
                .entry(data_set_id.clone())
                .or_insert_with(|| DataSetRecord {
                    data_set_id,
                    wallet,
                    created_at: Utc::now(),
                });
            Ok(())
        })
    }

    fn create_object(
        &self,
        object_id: &str,
        wallet: &str,
        data_set_id: &str,
        size_bytes: u64,
    ) -> Pin<Box<dyn Future<Output = StoreResult<ObjectRecord>> + Send + '_>> {
        let record = ObjectRecord {
            object_id: object_id.to_string(),
            wallet: wallet.to_string(),
            data_set_id: data_set_id.to_string(),
            size_bytes,
            created_at: Utc::now(),
        };
        Box::pin(async move {
            let mut inner = self.inner.write().expect("rwlock poisoned");
            if inner.objects.contains_key(&record.object_id) {
                return Err(StoreError::Constraint {
                    entity: "object",
                    id: record.object_id,
                });
            }
            inner
                .objects
                .insert(record.object_id.clone(), record.clone());
            Ok(record)
        })
    }

    fn get_object(
        &self,
        object_id: &str,
    ) -> Pin<Box<dyn Future<Output = StoreResult<Option<ObjectRecord>>> + Send + '_>> {
        let object_id = object_id.to_string();
        Box::pin(async move {
            let inner = self.inner.read().expect("rwlock poisoned");
            Ok(inner.objects.get(&object_id).cloned())
        })
    }

    fn create_lease(
        &self,
        lease: ObjectLease,
    ) -> Pin<Box<dyn Future<Output = StoreResult<()>> + Send + '_>> {
        Box::pin(async move {
            let mut inner = self.inner.write().expect("rwlock poisoned");
            if inner.leases.contains_key(&lease.lease_id) {
                return Err(StoreError::Constraint {
                    entity: "lease",
                    id: lease.lease_id,
                });
            }
            // tombstoned_at is never persisted.
            let lease = ObjectLease {
                tombstoned_at: None,
                ..lease
            };
            inner.leases.insert(lease.lease_id.clone(), lease);
            Ok(())
        })
    }

    fn get_lease(
        &self,
        lease_id: &str,
    ) -> Pin<Box<dyn Future<Output = StoreResult<Option<ObjectLease>>> + Send + '_>> {
        let lease_id = lease_id.to_string();
        Box::pin(async move {
            let inner = self.inner.read().expect("rwlock poisoned");
            Ok(inner.leases.get(&lease_id).cloned())
        })
    }

    fn find_lease_by_object_id(
        &self,
        object_id: &str,
    ) -> Pin<Box<dyn Future<Output = StoreResult<Option<ObjectLease>>> + Send + '_>> {
        let object_id = object_id.to_string();
        Box::pin(async move {
            let inner = self.inner.read().expect("rwlock poisoned");
            Ok(inner
                .leases
                .values()
                .filter(|lease| lease.object_id == object_id)
                .min_by(|a, b| newest_first(a, b))
                .cloned())
        })
    }

    fn list_leases_by_owner(
        &self,
        wallet: &str,
    ) -> Pin<Box<dyn Future<Output = StoreResult<Vec<(ObjectLease, ObjectRecord)>>> + Send + '_>>
    {
        let wallet = wallet.to_string();
        Box::pin(async move {
            let inner = self.inner.read().expect("rwlock poisoned");
            let mut leases: Vec<&ObjectLease> = inner
                .leases
                .values()
                .filter(|lease| lease.wallet == wallet)
                .collect();
            leases.sort_by(|a, b| newest_first(a, b));
            Ok(leases
                .into_iter()
                .filter_map(|lease| {
                    inner
                        .objects
                        .get(&lease.object_id)
                        .map(|object| (lease.clone(), object.clone()))
                })
                .collect())
        })
    }

    fn find_expired_unswept(
        &self,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = StoreResult<Vec<ObjectLease>>> + Send + '_>> {
        Box::pin(async move {
            let inner = self.inner.read().expect("rwlock poisoned");
            let mut expired: Vec<ObjectLease> = inner
                .leases
                .values()
                .filter(|lease| {
                    lease.deleted_at.is_none()
                        && lease.expire_at.is_some_and(|expire_at| expire_at <= now)
                })
                .cloned()
                .collect();
            expired.sort_by(|a, b| a.lease_id.cmp(&b.lease_id));
            Ok(expired)
        })
    }

    fn mark_deleted(
        &self,
        lease_id: &str,
        at: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = StoreResult<bool>> + Send + '_>> {
        let lease_id = lease_id.to_string();
        Box::pin(async move {
            let mut inner = self.inner.write().expect("rwlock poisoned");
            match inner.leases.get_mut(&lease_id) {
                Some(lease) if lease.deleted_at.is_none() => {
                    lease.deleted_at = Some(at);
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }

    fn compute_stats(
        &self,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = StoreResult<AggregateStats>> + Send + '_>> {
        Box::pin(async move {
            let inner = self.inner.read().expect("rwlock poisoned");
            let today = start_of_utc_day(now);

            let stats = AggregateStats {
                total_users: inner.users.len() as u64,
                new_users_today: inner
                    .users
                    .values()
                    .filter(|user| user.created_at >= today)
                    .count() as u64,
                total_storage_bytes: inner.objects.values().map(|o| o.size_bytes).sum(),
                storage_today_bytes: inner
                    .objects
                    .values()
                    .filter(|o| o.created_at >= today)
                    .map(|o| o.size_bytes)
                    .sum(),
                ..AggregateStats::default()
            };

            let leases: Vec<ObjectLease> = inner.leases.values().cloned().collect();
            Ok(stats.with_leases(&leases, now))
        })
    }
}
