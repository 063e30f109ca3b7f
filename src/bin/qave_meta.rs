//! CLI entry point for qave-meta: offline metadata inspection and maintenance.
//!
//! Works directly against the SQLite metadata database; the server may
//! keep running (WAL mode allows a concurrent reader and writer).

use chrono::Utc;
use clap::{Parser, Subcommand};
use qave::handlers::object::ObjectListing;
use qave::metadata::sqlite::SqliteMetadataStore;
use qave::metadata::store::MetadataStore;
use qave::storage::local::LocalAdapter;
use qave::sweeper::Sweeper;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "qave-meta", about = "Qave metadata inspection tool")]
struct Cli {
    /// Server configuration file used to locate the database.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Explicit database path, overriding the configuration.
    #[arg(long, global = true)]
    db: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print dashboard statistics as JSON
    Stats,
    /// Print one wallet's leases with their derived status
    Leases {
        #[arg(long)]
        wallet: String,
    },
    /// Run one sweep cycle. Without --storage, leases are only marked
    /// deleted and their pieces stay on disk for good.
    Sweep {
        /// Local storage root to reclaim swept pieces from.
        #[arg(long)]
        storage: Option<PathBuf>,
    },
}

fn resolve_db_path(config: Option<&PathBuf>, db: Option<String>) -> anyhow::Result<String> {
    if let Some(db) = db {
        return Ok(db);
    }
    let config = match config {
        Some(path) => qave::config::load_config(path)?,
        None => qave::config::Config::default(),
    };
    Ok(config.metadata.sqlite.path)
}

/// Sweeper that reclaims through the local adapter when a storage root
/// is given, and only marks metadata otherwise.
fn build_sweeper(
    store: Arc<dyn MetadataStore>,
    storage_root: Option<&Path>,
) -> anyhow::Result<Sweeper> {
    let interval = std::time::Duration::from_secs(1);
    Ok(match storage_root {
        Some(root) => Sweeper::new(store, Arc::new(LocalAdapter::new(root)?), interval),
        None => Sweeper::metadata_only(store, interval),
    })
}

fn main() {
    let cli = Cli::parse();
    let rc = match run(cli) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: {e:#}");
            1
        }
    };
    std::process::exit(rc);
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let db_path = resolve_db_path(cli.config.as_ref(), cli.db)?;
    if !std::path::Path::new(&db_path).exists() {
        anyhow::bail!("database not found: {db_path}");
    }
    let store: Arc<dyn MetadataStore> = Arc::new(SqliteMetadataStore::new(&db_path)?);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        match cli.command {
            Commands::Stats => {
                let stats = store.compute_stats(Utc::now()).await?;
                println!("{}", serde_json::to_string_pretty(&stats)?);
            }
            Commands::Leases { wallet } => {
                let rows: Vec<ObjectListing> = store
                    .list_leases_by_owner(&wallet)
                    .await?
                    .into_iter()
                    .map(|(lease, object)| ObjectListing::from_lease(lease, object))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&rows)?);
            }
            Commands::Sweep { storage } => {
                if storage.is_none() {
                    eprintln!("No --storage given: pieces of swept leases will not be reclaimed");
                }
                let sweeper = build_sweeper(store, storage.as_deref())?;
                let report = sweeper.run_cycle().await?;
                eprintln!(
                    "Swept {} of {} expired lease(s), reclaimed {} piece(s), {} failure(s)",
                    report.swept, report.examined, report.reclaimed, report.reclaim_failures
                );
            }
        }
        Ok::<(), anyhow::Error>(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::Duration;
    use qave::lifecycle::{ObjectLease, StorageRef};
    use qave::metadata::memory::MemoryMetadataStore;
    use qave::storage::adapter::{DataSetMeta, StorageAdapter, StorageError, UploadOptions};

    async fn seed_expired(store: &MemoryMetadataStore, adapter: &LocalAdapter) -> String {
        let ds = adapter
            .ensure_data_set(DataSetMeta {
                application: "Qave".to_string(),
                version: "1.0".to_string(),
                with_cdn: false,
            })
            .await
            .unwrap();
        let piece = adapter
            .upload(&ds, Bytes::from_static(b"stale"), UploadOptions::default())
            .await
            .unwrap()
            .piece_cid;
        store
            .create_lease(ObjectLease {
                lease_id: "l1".to_string(),
                object_id: "o1".to_string(),
                wallet: "w1".to_string(),
                created_at: Utc::now() - Duration::days(31),
                expire_at: Some(Utc::now() - Duration::days(1)),
                tombstoned_at: None,
                deleted_at: None,
                storage_ref: StorageRef {
                    data_set_id: ds.as_str().to_string(),
                    piece_cid: piece.as_str().to_string(),
                },
            })
            .await
            .unwrap();
        piece.as_str().to_string()
    }

    #[tokio::test]
    async fn test_sweep_with_storage_reclaims_pieces() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = LocalAdapter::new(dir.path()).unwrap();
        let store = Arc::new(MemoryMetadataStore::new());
        let piece = seed_expired(&store, &adapter).await;

        let sweeper = build_sweeper(store.clone(), Some(dir.path())).unwrap();
        let report = sweeper.run_cycle().await.unwrap();
        assert_eq!(report.swept, 1);
        assert_eq!(report.reclaimed, 1);
        assert!(matches!(
            adapter
                .download(&qave::storage::adapter::PieceCid(piece))
                .await,
            Err(StorageError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_sweep_without_storage_leaves_pieces() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = LocalAdapter::new(dir.path()).unwrap();
        let store = Arc::new(MemoryMetadataStore::new());
        let piece = seed_expired(&store, &adapter).await;

        let sweeper = build_sweeper(store.clone(), None).unwrap();
        let report = sweeper.run_cycle().await.unwrap();
        assert_eq!(report.swept, 1);
        assert_eq!(report.reclaimed, 0);
        assert!(adapter
            .download(&qave::storage::adapter::PieceCid(piece))
            .await
            .is_ok());
    }
}
