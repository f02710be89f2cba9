use anyhow::{Context, Result};
use axum::Router;
use sqlx::sqlite::SqlitePoolOptions;
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod client;
mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;

use config::{AppConfig, Command, SessionBackend, UploadArgs};
use services::{
    artifact_store::LocalArtifactStore,
    session_store::{MemorySessionStore, SessionStore},
    sqlite_session_store::{self, SqliteSessionStore},
    sweeper::spawn_sweeper,
    upload_service::UploadService,
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + command ---
    let (cfg, command) = AppConfig::from_env_and_args()?;

    match command {
        Command::Serve => serve(cfg).await,
        Command::Migrate => {
            let db = connect_sqlite(&cfg.database_url).await?;
            sqlite_session_store::migrate(&db).await?;
            tracing::info!("Database migration complete.");
            Ok(())
        }
        Command::Upload(args) => upload(args).await,
    }
}

async fn serve(cfg: AppConfig) -> Result<()> {
    tracing::info!("Starting upload-service with config: {:?}", cfg);

    // --- Ensure storage directories exist ---
    for dir in [&cfg.storage_dir, &cfg.temp_dir] {
        if !Path::new(dir).exists() {
            fs::create_dir_all(dir)?;
            tracing::info!("Created directory at {}", dir);
        }
    }

    // --- Session store ---
    let sessions: Arc<dyn SessionStore> = match cfg.session_store {
        SessionBackend::Sqlite => {
            let db = connect_sqlite(&cfg.database_url).await?;
            sqlite_session_store::migrate(&db).await?;
            Arc::new(SqliteSessionStore::new(Arc::new(db)))
        }
        SessionBackend::Memory => {
            tracing::warn!("Using in-memory session store; sessions will not survive a restart");
            Arc::new(MemorySessionStore::new())
        }
    };

    errors::set_expose_details(cfg.is_development());

    // --- Initialize core service ---
    let limits = cfg.limits()?;
    let artifacts = Arc::new(LocalArtifactStore::new(
        cfg.storage_dir.clone(),
        cfg.public_base_url.clone(),
    ));
    let service = UploadService::new(sessions, artifacts, cfg.temp_dir.clone(), limits.clone());

    let _sweeper = spawn_sweeper(service.clone(), cfg.sweep_interval());

    // --- Build router ---
    let app: Router = routes::routes::routes(&limits).with_state(service);

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
    axum::serve(listener, app).await?;

    Ok(())
}

/// Open the SQLite pool, creating the database file and its parent directory
/// when missing.
async fn connect_sqlite(db_url: &str) -> Result<sqlx::SqlitePool> {
    tracing::debug!("Connecting using raw URL => {}", db_url);

    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");

    if !db_path.starts_with(":memory:") {
        let db_path = Path::new(db_path.split('?').next().unwrap_or(db_path));
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
                tracing::info!("Created missing directory {:?}", parent);
            }
        }
        if !db_path.exists() {
            fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(db_path)
                .with_context(|| format!("creating database file {}", db_path.display()))?;
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .with_context(|| format!("connecting to {}", db_url))?;
    Ok(pool)
}

async fn upload(args: UploadArgs) -> Result<()> {
    let uploader = client::uploader::Uploader::new(args.uploader_config())?;

    let handle = uploader.abort_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, aborting upload");
            handle.abort();
        }
    });

    let result = uploader
        .upload(&args.file, args.metadata(), |p| {
            tracing::info!(
                "{}/{} chunks, {}/{} bytes ({:.1}%)",
                p.chunks_done,
                p.total_chunks,
                p.bytes_uploaded,
                p.total_bytes,
                p.fraction() * 100.0
            );
        })
        .await
        .with_context(|| format!("uploading {}", args.file.display()))?;

    tracing::info!(
        "Uploaded {} -> {} (etag {}, needs conversion: {})",
        args.file.display(),
        result.location,
        result.etag,
        result.needs_conversion
    );
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
