//! Qave -- lease-based object storage server.
//!
//! SIGTERM/SIGINT stop accepting connections, let in-flight requests
//! finish, then signal the sweeper and wait for it with a timeout.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use qave::config::Config;
use qave::metadata::store::MetadataStore;
use qave::storage::adapter::StorageAdapter;
use qave::sweeper::Sweeper;

/// Command-line arguments for the Qave server.
#[derive(Parser, Debug)]
#[command(name = "qave", version, about = "Lease-based object storage server")]
struct Cli {
    /// Path to the YAML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<String>,

    /// Override the bind address (host:port).
    #[arg(short, long)]
    bind: Option<String>,
}

/// Install the global tracing subscriber. `RUST_LOG` wins over the config.
fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn open_metadata(config: &Config) -> anyhow::Result<Arc<dyn MetadataStore>> {
    match config.metadata.engine.as_str() {
        "memory" => {
            info!("In-memory metadata store initialized");
            Ok(Arc::new(qave::metadata::memory::MemoryMetadataStore::new()))
        }
        "sqlite" => {
            let path = &config.metadata.sqlite.path;
            // Ensure parent directory exists for the SQLite file.
            if let Some(parent) = std::path::Path::new(path).parent() {
                std::fs::create_dir_all(parent)?;
            }
            let store = qave::metadata::sqlite::SqliteMetadataStore::new(path)?;
            info!("SQLite metadata store initialized at {}", path);
            Ok(Arc::new(store))
        }
        other => anyhow::bail!("unknown metadata.engine '{other}' (expected sqlite or memory)"),
    }
}

fn open_storage(config: &Config) -> anyhow::Result<Arc<dyn StorageAdapter>> {
    match config.storage.backend.as_str() {
        "mock" => {
            info!("Mock storage adapter initialized");
            Ok(Arc::new(qave::storage::mock::MockAdapter::new()))
        }
        "local" => {
            let root = &config.storage.local.root_dir;
            let adapter = qave::storage::local::LocalAdapter::new(root)?;
            info!("Local storage adapter initialized at {}", root);
            Ok(Arc::new(adapter))
        }
        other => anyhow::bail!("unknown storage.backend '{other}' (expected mock or local)"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => qave::config::load_config(path)?,
        None => {
            let config = Config::default();
            config.check()?;
            config
        }
    };

    init_tracing(&config);
    match &cli.config {
        Some(path) => info!("Loaded configuration from {}", path),
        None => info!("No configuration file given, using defaults"),
    }

    let bind_addr = cli
        .bind
        .unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));

    if config.observability.metrics {
        qave::metrics::init_metrics();
        qave::metrics::describe_metrics();
        info!("Prometheus metrics initialized");
    }

    let metadata = open_metadata(&config)?;
    let storage = open_storage(&config)?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let sweeper_handle = if config.sweeper.enabled {
        let sweeper = Arc::new(Sweeper::new(
            Arc::clone(&metadata),
            Arc::clone(&storage),
            config.sweeper.interval(),
        ));
        Some(sweeper.spawn(shutdown_rx))
    } else {
        info!("Expiration sweeper disabled");
        None
    };

    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout);
    let state = Arc::new(qave::AppState {
        config,
        metadata,
        storage,
    });

    let app = qave::server::app(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Qave listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // A send error means the sweeper already exited.
    let _ = shutdown_tx.send(true);
    if let Some(handle) = sweeper_handle {
        match tokio::time::timeout(shutdown_timeout, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Sweeper task failed: {e}"),
            Err(_) => warn!(
                "Sweeper did not stop within {}s, exiting anyway",
                shutdown_timeout.as_secs()
            ),
        }
    }

    info!("Qave shut down");

    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C), then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        },
    }
}
