use anyhow::{Context, Result};
use axum::Router;
use media_store::{
    config::AppConfig,
    routes::routes::routes,
    services::{
        chunk_store::ChunkStore, metadata_index::MetadataIndex, storage_service::StorageService,
    },
};
use std::{fs, io::ErrorKind, path::Path};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting media-store with config: {:?}", cfg);

    // --- Ensure the SQLite file's directory exists ---
    let db_path = cfg
        .database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    tracing::debug!("Interpreted SQLite path => {}", db_path);
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    // --- Metadata index ---
    let index = MetadataIndex::connect(&cfg.database_url)
        .await
        .with_context(|| format!("opening metadata database {}", cfg.database_url))?;
    index.migrate().await.context("applying schema")?;

    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Chunk store ---
    let chunks = ChunkStore::open(&cfg.storage_dir, cfg.chunk_size)
        .await
        .with_context(|| format!("opening chunk store at {}", cfg.storage_dir))?;
    tracing::info!(
        "Chunk store at {} ({} byte chunks)",
        cfg.storage_dir,
        cfg.chunk_size
    );

    // --- Initialize core service ---
    let storage = StorageService::new(index, chunks);
    match storage.reconcile_orphans(cfg.orphan_grace).await {
        Ok(purged) => tracing::debug!("Startup reconciliation purged {} objects", purged),
        Err(err) => tracing::warn!("Startup reconciliation failed: {}", err),
    }

    // --- Build router ---
    let app: Router = routes(cfg.upload_limit()).with_state(storage);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Resolve on Ctrl-C so in-flight requests can finish.
async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
}
