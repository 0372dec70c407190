use anyhow::{Context, Result};
use axum::Router;
use std::{io::ErrorKind, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod db;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

use config::{AppConfig, JobStoreBackend, RunMode};
use services::{
    deletion_coordinator::CleanupRequest,
    job_store::{JobStore, MemoryJobStore, SqliteJobStore},
};
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + run mode ---
    let (cfg, mode) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting storage-reclaimer with config: {:?}", cfg);

    // --- Initialize SQLite connection ---
    let db = Arc::new(db::connect(&cfg.database_url).await?);
    db::run_migrations(&db)
        .await
        .context("applying database schema")?;

    // --- Handle migration mode ---
    if mode == RunMode::Migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize core services ---
    let store = state::build_store(&cfg)
        .await
        .context("initializing object store")?;
    let jobs: Arc<dyn JobStore> = match cfg.job_store {
        JobStoreBackend::Sqlite => Arc::new(SqliteJobStore::new(db.clone())),
        JobStoreBackend::Memory => Arc::new(MemoryJobStore::new()),
    };
    let app_state =
        AppState::build(&cfg, db, store, jobs).context("initializing remote worker client")?;

    match mode {
        RunMode::Cleanup {
            project_id,
            dry_run,
            mode,
            allow_full_scan,
        } => {
            let request = CleanupRequest::new(project_id)
                .dry_run(dry_run)
                .mode(mode)
                .allow_full_scan(allow_full_scan);
            let result = app_state.coordinator.cleanup(request).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        RunMode::PurgeAll { dry_run } => {
            let id = app_state.purges.start(dry_run).await?;
            let job = loop {
                match app_state.purges.status(id).await? {
                    Some(job) if job.state.is_terminal() => break job,
                    Some(_) => tokio::time::sleep(Duration::from_millis(500)).await,
                    None => anyhow::bail!("purge job {} disappeared", id),
                }
            };
            println!("{}", serde_json::to_string_pretty(&job)?);
            Ok(())
        }
        RunMode::Serve | RunMode::Migrate => serve(&cfg, app_state).await,
    }
}

async fn serve(cfg: &AppConfig, app_state: AppState) -> Result<()> {
    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(app_state);

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
