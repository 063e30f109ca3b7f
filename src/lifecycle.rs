//! Lease lifecycle engine.
//!
//! An [`ObjectLease`] binds one uploaded object to one content-addressed
//! storage location for a fixed window of time. Its visibility is never
//! stored: [`derive_status`] computes it on demand from `expire_at` and
//! `deleted_at`. Every read path, the dashboard aggregation and the
//! sweeper go through this module instead of comparing timestamps
//! themselves.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Derived visibility state of a lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum LeaseStatus {
    /// Readable by clients.
    Active,
    /// Past `expire_at` but not yet swept. Not readable.
    Expired,
    /// Marked deleted by the sweeper. Terminal.
    Deleted,
}

impl LeaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaseStatus::Active => "active",
            LeaseStatus::Expired => "expired",
            LeaseStatus::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for LeaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Location of a lease's bytes inside the storage adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct StorageRef {
    /// Backend container the piece was uploaded into.
    pub data_set_id: String,
    /// Content-addressed piece identifier.
    pub piece_cid: String,
}

/// The lifecycle-bearing record binding an object to its stored bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectLease {
    /// Unique per lease instance.
    pub lease_id: String,
    /// Object this lease makes readable.
    pub object_id: String,
    /// Owning wallet.
    pub wallet: String,
    pub created_at: DateTime<Utc>,
    /// Fixed at creation. `None` means the lease never expires by time.
    pub expire_at: Option<DateTime<Utc>>,
    /// Logical invisibility marker. Carried in memory only, never persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tombstoned_at: Option<DateTime<Utc>>,
    /// Set once by the sweeper, never cleared.
    pub deleted_at: Option<DateTime<Utc>>,
    pub storage_ref: StorageRef,
}

impl ObjectLease {
    /// Build a fresh lease that expires `duration` after `created_at`.
    pub fn new(
        lease_id: String,
        object_id: String,
        wallet: String,
        created_at: DateTime<Utc>,
        duration: chrono::Duration,
        storage_ref: StorageRef,
    ) -> Self {
        Self {
            lease_id,
            object_id,
            wallet,
            created_at,
            expire_at: Some(created_at + duration),
            tombstoned_at: None,
            deleted_at: None,
            storage_ref,
        }
    }

    /// Shorthand for `derive_status(self)`.
    pub fn status(&self) -> LeaseStatus {
        derive_status(self)
    }
}

/// Derive the status of `lease` against the current wall-clock time.
pub fn derive_status(lease: &ObjectLease) -> LeaseStatus {
    derive_status_at(lease, Utc::now())
}

/// Derive the status of `lease` as of `now`.
///
/// First match wins:
/// 1. `deleted_at` set -> [`LeaseStatus::Deleted`]
/// 2. `now >= expire_at` -> [`LeaseStatus::Expired`] (no grace period)
/// 3. otherwise -> [`LeaseStatus::Active`]
///
/// A lease without `expire_at` can only leave `Active` through deletion.
pub fn derive_status_at(lease: &ObjectLease, now: DateTime<Utc>) -> LeaseStatus {
    if lease.deleted_at.is_some() {
        return LeaseStatus::Deleted;
    }
    match lease.expire_at {
        Some(expire_at) if now >= expire_at => LeaseStatus::Expired,
        _ => LeaseStatus::Active,
    }
}

/// Lease counts per derived status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct StatusCounts {
    pub active: u64,
    pub expired: u64,
    pub deleted: u64,
}

impl StatusCounts {
    /// Tally `leases` by applying [`derive_status_at`] to each one.
    pub fn tally<'a, I>(leases: I, now: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = &'a ObjectLease>,
    {
        let mut counts = Self::default();
        for lease in leases {
            counts.record(derive_status_at(lease, now));
        }
        counts
    }

    pub fn record(&mut self, status: LeaseStatus) {
        match status {
            LeaseStatus::Active => self.active += 1,
            LeaseStatus::Expired => self.expired += 1,
            LeaseStatus::Deleted => self.deleted += 1,
        }
    }
}
