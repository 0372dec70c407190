//! Shared state handed to every handler.

use sqlx::SqlitePool;
use std::sync::Arc;

use crate::{
    config::{AppConfig, StoreBackend},
    services::{
        batch_deleter::BatchDeleter,
        deletion_coordinator::DeletionCoordinator,
        discovery::PatternDiscoveryEngine,
        dry_run::DryRunReporter,
        file_tracker::FileRecordTracker,
        job_store::JobStore,
        memory_store::MemoryObjectStore,
        object_store::{ObjectStoreClient, StoreResult},
        purge::PurgeService,
        remote_worker::{RemoteWorkerDelegate, RemoteWorkerError},
        s3_store::S3ObjectStore,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<SqlitePool>,
    pub store: Arc<dyn ObjectStoreClient>,
    pub tracker: FileRecordTracker,
    pub coordinator: Arc<DeletionCoordinator>,
    pub reporter: Arc<DryRunReporter>,
    pub purges: PurgeService,
}

impl AppState {
    /// Wire every component from configuration.
    pub fn build(
        cfg: &AppConfig,
        db: Arc<SqlitePool>,
        store: Arc<dyn ObjectStoreClient>,
        jobs: Arc<dyn JobStore>,
    ) -> Result<Self, RemoteWorkerError> {
        let cleanup = &cfg.cleanup;
        let tracker = FileRecordTracker::new(db.clone());
        let discovery = Arc::new(PatternDiscoveryEngine::new(store.clone(), cleanup));
        let worker = if cfg.worker.is_configured() {
            Some(RemoteWorkerDelegate::new(&cfg.worker)?)
        } else {
            None
        };
        let coordinator = Arc::new(DeletionCoordinator::from_config(
            store.clone(),
            tracker.clone(),
            discovery.clone(),
            worker,
            cleanup,
        ));
        let reporter = Arc::new(DryRunReporter::new(
            store.clone(),
            tracker.clone(),
            discovery,
            coordinator.clone(),
            cleanup.list_concurrency,
        ));
        let purges = PurgeService::new(
            store.clone(),
            tracker.clone(),
            jobs,
            BatchDeleter::new(store.clone(), cleanup.batch_size, cleanup.delete_concurrency),
        );

        Ok(Self {
            db,
            store,
            tracker,
            coordinator,
            reporter,
            purges,
        })
    }
}

/// Build the configured object store backend.
pub async fn build_store(cfg: &AppConfig) -> StoreResult<Arc<dyn ObjectStoreClient>> {
    match cfg.store.backend {
        StoreBackend::S3 => Ok(Arc::new(S3ObjectStore::new(&cfg.store).await?)),
        StoreBackend::Memory => Ok(Arc::new(MemoryObjectStore::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::test_pool,
        models::deletion::StrategyKind,
        services::job_store::MemoryJobStore,
    };

    async fn strategy_order(worker_enabled: &str) -> Vec<StrategyKind> {
        let (cfg, _) = AppConfig::from_sources(Default::default(), |key| match key {
            "RECLAIMER_STORE_BACKEND" => Some("memory".into()),
            "RECLAIMER_WORKER_URL" => Some("http://127.0.0.1:9/delete".into()),
            "RECLAIMER_WORKER_ENABLED" => Some(worker_enabled.into()),
            _ => None,
        })
        .unwrap();
        let state = AppState::build(
            &cfg,
            Arc::new(test_pool().await),
            Arc::new(MemoryObjectStore::new()),
            Arc::new(MemoryJobStore::new()),
        )
        .unwrap();
        state.coordinator.strategy_order()
    }

    #[tokio::test]
    async fn worker_url_alone_does_not_enable_the_worker() {
        assert_eq!(
            strategy_order("false").await,
            vec![StrategyKind::TrackedFiles, StrategyKind::PatternBased]
        );
    }

    #[tokio::test]
    async fn enabled_worker_leads_the_auto_chain() {
        assert_eq!(
            strategy_order("true").await,
            vec![StrategyKind::RemoteWorker, StrategyKind::TrackedFiles, StrategyKind::PatternBased]
        );
    }
}
