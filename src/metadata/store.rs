//! Abstract metadata store trait.
//!
//! Any metadata backend must implement [`MetadataStore`].  The trait
//! uses manually desugared async methods (pinned boxed futures) so it
//! can be held as `Arc<dyn MetadataStore>` by both request handlers and
//! the expiration sweeper.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::lifecycle::{derive_status_at, LeaseStatus, ObjectLease, StatusCounts};

// ── Errors ─────────────────────────────────────────────────────────

/// Errors surfaced by metadata store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A record with the same primary identifier already exists.
    #[error("{entity} already exists: {id}")]
    Constraint { entity: &'static str, id: String },

    /// A persisted row could not be decoded.
    #[error("corrupt {entity} record {id}: {reason}")]
    CorruptRecord {
        entity: &'static str,
        id: String,
        reason: String,
    },

    /// Underlying SQLite failure.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

// ── Record types ───────────────────────────────────────────────────

/// A wallet that has uploaded at least once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub wallet: String,
    pub created_at: DateTime<Utc>,
}

/// A backend container, owned by the wallet that first uploaded into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSetRecord {
    pub data_set_id: String,
    pub wallet: String,
    pub created_at: DateTime<Utc>,
}

/// One uploaded payload. Never deleted, even after its lease is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectRecord {
    pub object_id: String,
    pub wallet: String,
    pub data_set_id: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

/// Dashboard aggregate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AggregateStats {
    pub total_users: u64,
    /// Users created since 00:00 UTC today.
    pub new_users_today: u64,
    /// Sum over every object ever created, deleted or not.
    pub total_storage_bytes: u64,
    /// Bytes uploaded since 00:00 UTC today.
    pub storage_today_bytes: u64,
    /// Active leases with `expire_at <= now + 7 days`.
    pub expiring_in_7_days: u64,
    /// Lease counts by derived status.
    pub leases: StatusCounts,
}

/// Start of the UTC day containing `now`.
pub fn start_of_utc_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc())
        .unwrap_or(now)
}

/// Whether a lease is still active at `now` and expires within the
/// following seven days.
pub fn expires_within_week(lease: &ObjectLease, now: DateTime<Utc>) -> bool {
    derive_status_at(lease, now) == LeaseStatus::Active
        && lease
            .expire_at
            .is_some_and(|expire_at| expire_at <= now + chrono::Duration::days(7))
}

impl AggregateStats {
    /// Fill the lease-derived fields from a full scan of `leases`.
    pub fn with_leases(mut self, leases: &[ObjectLease], now: DateTime<Utc>) -> Self {
        self.expiring_in_7_days = leases
            .iter()
            .filter(|lease| expires_within_week(lease, now))
            .count() as u64;
        self.leases = StatusCounts::tally(leases, now);
        self
    }
}

/// Boxed future returned by every [`MetadataStore`] method.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = StoreResult<T>> + Send + 'a>>;

// ── Trait ───────────────────────────────────────────────────────────

/// Async metadata store contract.
///
/// The store is the only shared mutable state in the service. Each
/// operation is atomic on its own; there is no cross-operation locking.
pub trait MetadataStore: Send + Sync + 'static {
    // ── Users and data sets ─────────────────────────────────────────

    /// Insert a user with `created_at = now`; no-op if it already exists.
    fn create_user_if_absent(&self, wallet: &str) -> StoreFuture<'_, ()>;

    /// Insert a data set owned by `wallet`; no-op if it already exists.
    fn create_data_set_if_absent(&self, data_set_id: &str, wallet: &str) -> StoreFuture<'_, ()>;

    // ── Objects ─────────────────────────────────────────────────────

    /// Insert a new object record. Fails with [`StoreError::Constraint`]
    /// if `object_id` is already taken.
    fn create_object(
        &self,
        object_id: &str,
        wallet: &str,
        data_set_id: &str,
        size_bytes: u64,
    ) -> StoreFuture<'_, ObjectRecord>;

    /// Get a single object record.
    fn get_object(&self, object_id: &str) -> StoreFuture<'_, Option<ObjectRecord>>;

    // ── Leases ──────────────────────────────────────────────────────

    /// Insert a new lease. Fails with [`StoreError::Constraint`] if
    /// `lease_id` is already taken.
    fn create_lease(&self, lease: ObjectLease) -> StoreFuture<'_, ()>;

    /// Get a lease by its identifier.
    fn get_lease(&self, lease_id: &str) -> StoreFuture<'_, Option<ObjectLease>>;

    /// The most recently created lease for `object_id`, whatever its
    /// derived status. Callers decide visibility with
    /// [`crate::lifecycle::derive_status`].
    fn find_lease_by_object_id(&self, object_id: &str) -> StoreFuture<'_, Option<ObjectLease>>;

    /// Every lease owned by `wallet` with its object, newest first.
    ///
    /// Unbounded; there is no pagination.
    fn list_leases_by_owner(
        &self,
        wallet: &str,
    ) -> StoreFuture<'_, Vec<(ObjectLease, ObjectRecord)>>;

    /// Leases with `deleted_at` unset and `expire_at <= now`, ordered by
    /// lease id. Used only by the sweeper.
    fn find_expired_unswept(&self, now: DateTime<Utc>) -> StoreFuture<'_, Vec<ObjectLease>>;

    /// Set `deleted_at = at` unless already set. Returns `true` when this
    /// call performed the transition, `false` when it was a no-op
    /// (already deleted, or unknown lease).
    fn mark_deleted(&self, lease_id: &str, at: DateTime<Utc>) -> StoreFuture<'_, bool>;

    // ── Aggregates ──────────────────────────────────────────────────

    /// Dashboard aggregate as of `now`. Lease status counts come from
    /// loading every lease and applying the lifecycle engine, not from a
    /// store-side filter.
    fn compute_stats(&self, now: DateTime<Utc>) -> StoreFuture<'_, AggregateStats>;
}
