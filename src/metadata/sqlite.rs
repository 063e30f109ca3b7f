//! SQLite-backed metadata store.
//!
//! Uses `rusqlite` with the `bundled` feature so no system SQLite
//! library is required.  All async trait methods are thin wrappers
//! around synchronous rusqlite calls executed under a `Mutex`, which
//! also serializes writes from request handlers and the sweeper.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings with
//! nanosecond precision (`2026-10-16T08:00:00.000000000Z`), so string
//! comparison in SQL agrees with chronological order and a round trip
//! never moves a value across an expiry boundary.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};

use super::store::{
    start_of_utc_day, AggregateStats, MetadataStore, ObjectRecord, StoreError, StoreResult,
};
use crate::lifecycle::{ObjectLease, StorageRef};

/// Current schema version. Bumped when migrations are added.
const SCHEMA_VERSION: i64 = 1;

const LEASE_COLUMNS: &str = "l.lease_id, l.object_id, l.wallet, l.created_at, l.expire_at, \
                             l.deleted_at, l.data_set_id, l.piece_cid";

/// Metadata store backed by a single SQLite database file.
pub struct SqliteMetadataStore {
    /// The database connection, guarded by a mutex for Send + Sync.
    conn: Mutex<Connection>,
}

impl SqliteMetadataStore {
    /// Open (or create) the database at `path` and initialize the schema.
    ///
    /// Passing `":memory:"` creates an in-memory database (useful for tests).
    pub fn new(path: &str) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.apply_pragmas()?;
        store.init_db()?;
        Ok(store)
    }

    fn apply_pragmas(&self) -> StoreResult<()> {
        let conn = self.conn.lock().expect("mutex poisoned");
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;
        Ok(())
    }

    /// Create the required tables and indexes if they do not already exist.
    /// Idempotent, runs on every startup.
    fn init_db(&self) -> StoreResult<()> {
        let conn = self.conn.lock().expect("mutex poisoned");
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS schema_version (
                version    INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS users (
                wallet     TEXT PRIMARY KEY,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_users_created
                ON users(created_at);

            CREATE TABLE IF NOT EXISTS datasets (
                data_set_id TEXT PRIMARY KEY,
                wallet      TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS objects (
                object_id   TEXT PRIMARY KEY,
                wallet      TEXT NOT NULL,
                data_set_id TEXT NOT NULL,
                size_bytes  INTEGER NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_objects_created
                ON objects(created_at);

            -- expire_at NULL means the lease never expires by time.
            CREATE TABLE IF NOT EXISTS leases (
                lease_id    TEXT PRIMARY KEY,
                object_id   TEXT NOT NULL,
                wallet      TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                expire_at   TEXT,
                deleted_at  TEXT,
                data_set_id TEXT NOT NULL,
                piece_cid   TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_leases_object
                ON leases(object_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_leases_wallet
                ON leases(wallet, created_at);
            CREATE INDEX IF NOT EXISTS idx_leases_unswept
                ON leases(deleted_at, expire_at);
            ",
        )?;

        let existing: Option<i64> = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .optional()?
            .flatten();

        if existing.map_or(true, |v| v < SCHEMA_VERSION) {
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version, applied_at) VALUES (?1, ?2)",
                params![SCHEMA_VERSION, encode_ts(Utc::now())],
            )?;
        }

        Ok(())
    }
}

// ── Row codecs ─────────────────────────────────────────────────────

/// Encode a timestamp in the fixed-width, lexically ordered form.
fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn decode_ts(raw: &str, entity: &'static str, id: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::CorruptRecord {
            entity,
            id: id.to_string(),
            reason: format!("bad timestamp {raw:?}: {e}"),
        })
}

/// Map a failed INSERT to [`StoreError::Constraint`] on key collision.
fn insert_error(err: rusqlite::Error, entity: &'static str, id: &str) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            StoreError::Constraint {
                entity,
                id: id.to_string(),
            }
        }
        _ => StoreError::Database(err),
    }
}

/// A lease row as stored, before timestamp decoding.
struct LeaseRow {
    lease_id: String,
    object_id: String,
    wallet: String,
    created_at: String,
    expire_at: Option<String>,
    deleted_at: Option<String>,
    data_set_id: String,
    piece_cid: String,
}

impl LeaseRow {
    /// Read the [`LEASE_COLUMNS`] starting at column `offset`.
    fn from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<Self> {
        Ok(Self {
            lease_id: row.get(offset)?,
            object_id: row.get(offset + 1)?,
            wallet: row.get(offset + 2)?,
            created_at: row.get(offset + 3)?,
            expire_at: row.get(offset + 4)?,
            deleted_at: row.get(offset + 5)?,
            data_set_id: row.get(offset + 6)?,
            piece_cid: row.get(offset + 7)?,
        })
    }

    fn decode(self) -> StoreResult<ObjectLease> {
        let id = self.lease_id.as_str();
        let created_at = decode_ts(&self.created_at, "lease", id)?;
        let expire_at = self
            .expire_at
            .as_deref()
            .map(|raw| decode_ts(raw, "lease", id))
            .transpose()?;
        let deleted_at = self
            .deleted_at
            .as_deref()
            .map(|raw| decode_ts(raw, "lease", id))
            .transpose()?;
        Ok(ObjectLease {
            lease_id: self.lease_id,
            object_id: self.object_id,
            wallet: self.wallet,
            created_at,
            expire_at,
            tombstoned_at: None,
            deleted_at,
            storage_ref: StorageRef {
                data_set_id: self.data_set_id,
                piece_cid: self.piece_cid,
            },
        })
    }
}

struct ObjectRow {
    object_id: String,
    wallet: String,
    data_set_id: String,
    size_bytes: i64,
    created_at: String,
}

impl ObjectRow {
    fn from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<Self> {
        Ok(Self {
            object_id: row.get(offset)?,
            wallet: row.get(offset + 1)?,
            data_set_id: row.get(offset + 2)?,
            size_bytes: row.get(offset + 3)?,
            created_at: row.get(offset + 4)?,
        })
    }

    fn decode(self) -> StoreResult<ObjectRecord> {
        let created_at = decode_ts(&self.created_at, "object", &self.object_id)?;
        Ok(ObjectRecord {
            object_id: self.object_id,
            wallet: self.wallet,
            data_set_id: self.data_set_id,
            size_bytes: self.size_bytes as u64,
            created_at,
        })
    }
}

fn count(conn: &Connection, sql: &str, param: Option<&str>) -> StoreResult<u64> {
    let value: i64 = match param {
        Some(p) => conn.query_row(sql, params![p], |row| row.get(0))?,
        None => conn.query_row(sql, [], |row| row.get(0))?,
    };
    Ok(value as u64)
}

// ── MetadataStore implementation ───────────────────────────────────

impl MetadataStore for SqliteMetadataStore {
    fn create_user_if_absent(
        &self,
        wallet: &str,
    ) -> Pin<Box<dyn Future<Output = StoreResult<()>> + Send + '_>> {
        let wallet = wallet.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            conn.execute(
                "INSERT OR IGNORE INTO users (wallet, created_at) VALUES (?1, ?2)",
                params![wallet, encode_ts(Utc::now())],
            )?;
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
            let conn = self.conn.lock().expect("mutex poisoned");
            conn.execute(
                "INSERT OR IGNORE INTO datasets (data_set_id, wallet, created_at)
                 VALUES (?1, ?2, ?3)",
                params![data_set_id, wallet, encode_ts(Utc::now())],
            )?;
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
            let conn = self.conn.lock().expect("mutex poisoned");
            conn.execute(
                "INSERT INTO objects (object_id, wallet, data_set_id, size_bytes, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.object_id,
                    record.wallet,
                    record.data_set_id,
                    record.size_bytes as i64,
                    encode_ts(record.created_at),
                ],
            )
            .map_err(|e| insert_error(e, "object", &record.object_id))?;
            Ok(record)
        })
    }

    fn get_object(
        &self,
        object_id: &str,
    ) -> Pin<Box<dyn Future<Output = StoreResult<Option<ObjectRecord>>> + Send + '_>> {
        let object_id = object_id.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let row = conn
                .query_row(
                    "SELECT object_id, wallet, data_set_id, size_bytes, created_at
                     FROM objects WHERE object_id = ?1",
                    params![object_id],
                    |row| ObjectRow::from_row(row, 0),
                )
                .optional()?;
            row.map(ObjectRow::decode).transpose()
        })
    }

    fn create_lease(
        &self,
        lease: ObjectLease,
    ) -> Pin<Box<dyn Future<Output = StoreResult<()>> + Send + '_>> {
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            conn.execute(
                "INSERT INTO leases
                    (lease_id, object_id, wallet, created_at, expire_at, deleted_at,
                     data_set_id, piece_cid)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    lease.lease_id,
                    lease.object_id,
                    lease.wallet,
                    encode_ts(lease.created_at),
                    lease.expire_at.map(encode_ts),
                    lease.deleted_at.map(encode_ts),
                    lease.storage_ref.data_set_id,
                    lease.storage_ref.piece_cid,
                ],
            )
            .map_err(|e| insert_error(e, "lease", &lease.lease_id))?;
            Ok(())
        })
    }

    fn get_lease(
        &self,
        lease_id: &str,
    ) -> Pin<Box<dyn Future<Output = StoreResult<Option<ObjectLease>>> + Send + '_>> {
        let lease_id = lease_id.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let row = conn
                .query_row(
                    &format!("SELECT {LEASE_COLUMNS} FROM leases l WHERE l.lease_id = ?1"),
                    params![lease_id],
                    |row| LeaseRow::from_row(row, 0),
                )
                .optional()?;
            row.map(LeaseRow::decode).transpose()
        })
    }

    fn find_lease_by_object_id(
        &self,
        object_id: &str,
    ) -> Pin<Box<dyn Future<Output = StoreResult<Option<ObjectLease>>> + Send + '_>> {
        let object_id = object_id.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let row = conn
                .query_row(
                    &format!(
                        "SELECT {LEASE_COLUMNS} FROM leases l
                         WHERE l.object_id = ?1
                         ORDER BY l.created_at DESC, l.lease_id DESC
                         LIMIT 1"
                    ),
                    params![object_id],
                    |row| LeaseRow::from_row(row, 0),
                )
                .optional()?;
            row.map(LeaseRow::decode).transpose()
        })
    }

    fn list_leases_by_owner(
        &self,
        wallet: &str,
    ) -> Pin<Box<dyn Future<Output = StoreResult<Vec<(ObjectLease, ObjectRecord)>>> + Send + '_>>
    {
        let wallet = wallet.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let mut stmt = conn.prepare(&format!(
                "SELECT {LEASE_COLUMNS},
                        o.object_id, o.wallet, o.data_set_id, o.size_bytes, o.created_at
                 FROM leases l
                 JOIN objects o ON o.object_id = l.object_id
                 WHERE l.wallet = ?1
                 ORDER BY l.created_at DESC, l.lease_id DESC"
            ))?;
            let rows = stmt.query_map(params![wallet], |row| {
                Ok((LeaseRow::from_row(row, 0)?, ObjectRow::from_row(row, 8)?))
            })?;
            let mut result = Vec::new();
            for row in rows {
                let (lease, object) = row?;
                result.push((lease.decode()?, object.decode()?));
            }
            Ok(result)
        })
    }

    fn find_expired_unswept(
        &self,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = StoreResult<Vec<ObjectLease>>> + Send + '_>> {
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let mut stmt = conn.prepare(&format!(
                "SELECT {LEASE_COLUMNS} FROM leases l
                 WHERE l.deleted_at IS NULL
                   AND l.expire_at IS NOT NULL
                   AND l.expire_at <= ?1
                 ORDER BY l.lease_id"
            ))?;
            let rows = stmt.query_map(params![encode_ts(now)], |row| LeaseRow::from_row(row, 0))?;
            let mut leases = Vec::new();
            for row in rows {
                leases.push(row?.decode()?);
            }
            Ok(leases)
        })
    }

    fn mark_deleted(
        &self,
        lease_id: &str,
        at: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = StoreResult<bool>> + Send + '_>> {
        let lease_id = lease_id.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let changed = conn.execute(
                "UPDATE leases SET deleted_at = ?2
                 WHERE lease_id = ?1 AND deleted_at IS NULL",
                params![lease_id, encode_ts(at)],
            )?;
            Ok(changed > 0)
        })
    }

    fn compute_stats(
        &self,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = StoreResult<AggregateStats>> + Send + '_>> {
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let today = encode_ts(start_of_utc_day(now));

            let stats = AggregateStats {
                total_users: count(&conn, "SELECT COUNT(*) FROM users", None)?,
                new_users_today: count(
                    &conn,
                    "SELECT COUNT(*) FROM users WHERE created_at >= ?1",
                    Some(today.as_str()),
                )?,
                total_storage_bytes: count(
                    &conn,
                    "SELECT COALESCE(SUM(size_bytes), 0) FROM objects",
                    None,
                )?,
                storage_today_bytes: count(
                    &conn,
                    "SELECT COALESCE(SUM(size_bytes), 0) FROM objects WHERE created_at >= ?1",
                    Some(today.as_str()),
                )?,
                ..AggregateStats::default()
            };

            let mut stmt = conn.prepare(&format!("SELECT {LEASE_COLUMNS} FROM leases l"))?;
            let rows = stmt.query_map([], |row| LeaseRow::from_row(row, 0))?;
            let mut leases = Vec::new();
            for row in rows {
                leases.push(row?.decode()?);
            }

            Ok(stats.with_leases(&leases, now))
        })
    }
}

// ── Tests ──────────────────────────────────────────────────────────
