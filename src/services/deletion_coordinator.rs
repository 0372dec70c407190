//! DeletionCoordinator: runs the strategy chain for one project.
//!
//! Order is worker, then tracked records, then pattern discovery. The first
//! strategy that produces a result wins; explicit modes run a single one.

use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::{
    config::CleanupConfig,
    models::{
        deletion::{DeletionResult, StrategyKind, StrategyMode},
        project::{ProjectIdError, ProjectIdentifier},
    },
    services::{
        batch_deleter::{BatchDeleter, RunControl},
        discovery::{DiscoveryError, PatternDiscoveryEngine},
        file_tracker::{FileRecordTracker, TrackingError},
        object_store::ObjectStoreClient,
        remote_worker::RemoteWorkerDelegate,
        strategies::{
            CleanupContext, DeletionStrategy, PatternStrategy, Reconciler, RemoteWorkerStrategy,
            TrackedFilesStrategy,
        },
    },
};

#[derive(Debug, Error)]
pub enum CleanupError {
    #[error("invalid project identifier: {0}")]
    InvalidProjectIdentifier(#[from] ProjectIdError),
    #[error("object store unavailable: {0}")]
    ObjectStoreUnavailable(String),
    #[error("tracking persistence error: {0}")]
    TrackingPersistence(#[from] TrackingError),
}

impl From<DiscoveryError> for CleanupError {
    fn from(err: DiscoveryError) -> Self {
        match err {
            DiscoveryError::StoreUnavailable(reason) => CleanupError::ObjectStoreUnavailable(reason),
        }
    }
}

/// One cleanup invocation.
#[derive(Debug, Clone, Default)]
pub struct CleanupRequest {
    pub project_id: String,
    pub dry_run: bool,
    pub mode: StrategyMode,
    pub allow_full_scan: bool,
    pub cancel: CancellationToken,
    pub deadline: Option<Instant>,
}

impl CleanupRequest {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            ..Self::default()
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn mode(mut self, mode: StrategyMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn allow_full_scan(mut self, allow: bool) -> Self {
        self.allow_full_scan = allow;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }
}

pub struct DeletionCoordinator {
    tracker: FileRecordTracker,
    strategies: Vec<Box<dyn DeletionStrategy>>,
    /// Strategies that run only when a mode asks for them by name.
    explicit_only: Vec<StrategyKind>,
}

impl DeletionCoordinator {
    pub fn new(tracker: FileRecordTracker, strategies: Vec<Box<dyn DeletionStrategy>>) -> Self {
        Self {
            tracker,
            strategies,
            explicit_only: Vec::new(),
        }
    }

    /// Keep `kind` out of the `auto` chain.
    pub fn explicit_only(mut self, kind: StrategyKind) -> Self {
        if !self.explicit_only.contains(&kind) {
            self.explicit_only.push(kind);
        }
        self
    }

    /// Build the standard chain. The worker strategy is present only when a
    /// delegate is supplied, and leads the `auto` chain only when enabled.
    pub fn from_config(
        store: Arc<dyn ObjectStoreClient>,
        tracker: FileRecordTracker,
        discovery: Arc<PatternDiscoveryEngine>,
        worker: Option<RemoteWorkerDelegate>,
        config: &CleanupConfig,
    ) -> Self {
        let deleter = BatchDeleter::new(store, config.batch_size, config.delete_concurrency);
        let reconciler = Reconciler::new(tracker.clone(), config.reconcile_policy);

        let mut strategies: Vec<Box<dyn DeletionStrategy>> = Vec::new();
        let mut worker_enabled = true;
        if let Some(worker) = worker {
            worker_enabled = worker.enabled();
            strategies.push(Box::new(RemoteWorkerStrategy::new(worker, reconciler.clone())));
        }
        strategies.push(Box::new(TrackedFilesStrategy::new(deleter.clone(), reconciler)));
        strategies.push(Box::new(PatternStrategy::new(discovery, deleter, tracker.clone())));

        let coordinator = Self::new(tracker, strategies);
        if worker_enabled {
            coordinator
        } else {
            coordinator.explicit_only(StrategyKind::RemoteWorker)
        }
    }

    /// Strategy kinds in the order `auto` mode tries them.
    pub fn strategy_order(&self) -> Vec<StrategyKind> {
        self.strategies
            .iter()
            .map(|s| s.kind())
            .filter(|kind| !self.explicit_only.contains(kind))
            .collect()
    }

    fn has_strategy(&self, kind: StrategyKind) -> bool {
        self.strategies.iter().any(|s| s.kind() == kind)
    }

    /// Remove every object belonging to a project, or plan it on a dry run.
    #[instrument(skip(self, request), fields(project_id = %request.project_id, dry_run = request.dry_run, mode = ?request.mode))]
    pub async fn cleanup(&self, request: CleanupRequest) -> Result<DeletionResult, CleanupError> {
        let project = ProjectIdentifier::normalize(&request.project_id)?;
        let tracked = match self.tracker.list_by_project(&project).await {
            Ok(rows) => rows,
            Err(err) => {
                warn!(error = %err, "Could not read tracked records; treating as none");
                Vec::new()
            }
        };
        info!(tracked = tracked.len(), "Starting cleanup");

        let forced = request.mode.forced();
        let ctx = CleanupContext {
            project,
            dry_run: request.dry_run,
            allow_full_scan: request.allow_full_scan,
            forced: forced.is_some(),
            control: RunControl::new(request.cancel, request.deadline),
            tracked,
        };

        for strategy in &self.strategies {
            match forced {
                Some(kind) if kind != strategy.kind() => continue,
                None if self.explicit_only.contains(&strategy.kind()) => continue,
                _ => {}
            }
            if let Some(result) = strategy.attempt(&ctx).await? {
                info!(
                    strategy = %result.strategy_used,
                    matched = result.matched_objects.len(),
                    deleted = result.deleted_count,
                    failed = result.failed_count,
                    skipped = result.skipped_count,
                    bytes_freed = result.total_bytes_freed,
                    "Cleanup finished"
                );
                return Ok(result);
            }
        }

        if let Some(kind) = forced {
            if !self.has_strategy(kind) {
                warn!(strategy = %kind, "Requested strategy is not configured");
            }
        }
        info!("No strategy found anything to delete");
        Ok(DeletionResult::empty(&ctx.project.with_prefix, ctx.dry_run))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{ReconcilePolicy, WorkerConfig},
        db::test_pool,
        models::tracked_file::NewTrackedFile,
        services::{memory_store::MemoryObjectStore, object_store::ObjectStoreExt, test_support::FaultyStore},
    };
    use wiremock::{Mock, MockServer, ResponseTemplate, matchers::method};

    struct Harness {
        inner: Arc<MemoryObjectStore>,
        store: Arc<FaultyStore>,
        tracker: FileRecordTracker,
        coordinator: DeletionCoordinator,
    }

    async fn harness_with(
        wrap: impl FnOnce(FaultyStore) -> FaultyStore,
        worker: Option<RemoteWorkerDelegate>,
        config: CleanupConfig,
    ) -> Harness {
        let inner = Arc::new(MemoryObjectStore::new());
        let store = Arc::new(wrap(FaultyStore::new(inner.clone())));
        let tracker = FileRecordTracker::new(Arc::new(test_pool().await));
        let discovery = Arc::new(PatternDiscoveryEngine::new(store.clone(), &config));
        let coordinator =
            DeletionCoordinator::from_config(store.clone(), tracker.clone(), discovery, worker, &config);
        Harness {
            inner,
            store,
            tracker,
            coordinator,
        }
    }

    async fn harness() -> Harness {
        harness_with(|s| s, None, CleanupConfig::default()).await
    }

    impl Harness {
        async fn upload(&self, project_id: &str, key: &str, size: usize) {
            self.inner.put(key, vec![0u8; size]).unwrap();
            self.tracker
                .record(
                    project_id,
                    key,
                    NewTrackedFile {
                        size_bytes: size as i64,
                        ..NewTrackedFile::default()
                    },
                )
                .await
                .unwrap();
        }

        async fn tracked_rows(&self, project_id: &str) -> i64 {
            self.tracker
                .count_by_project(&ProjectIdentifier::normalize(project_id).unwrap())
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn tracked_records_are_deleted_with_their_rows() {
        let h = harness().await;
        for key in ["proj_abc12345_a.mp3", "proj_abc12345_b.mp3", "users/u1/proj_abc12345/c.png"] {
            h.upload("proj_abc12345", key, 10).await;
        }
        h.inner.put("proj_other999_a.mp3", "keep").unwrap();

        let result = h.coordinator.cleanup(CleanupRequest::new("proj_abc12345")).await.unwrap();

        assert_eq!(result.strategy_used, StrategyKind::TrackedFiles);
        assert_eq!(result.deleted_count, 3);
        assert_eq!(result.failed_count, 0);
        assert_eq!(result.total_bytes_freed, 30);
        assert_eq!(result.tracked_records_removed, 3);
        assert_eq!(h.tracked_rows("proj_abc12345").await, 0);
        assert_eq!(h.inner.keys(), vec!["proj_other999_a.mp3".to_string()]);
    }

    #[tokio::test]
    async fn second_cleanup_finds_nothing() {
        let h = harness().await;
        h.upload("proj_abc12345", "proj_abc12345_a.mp3", 1).await;
        h.coordinator.cleanup(CleanupRequest::new("proj_abc12345")).await.unwrap();

        let again = h.coordinator.cleanup(CleanupRequest::new("proj_abc12345")).await.unwrap();
        assert_eq!(again.deleted_count, 0);
        assert_eq!(again.failed_count, 0);
        assert_eq!(again.strategy_used, StrategyKind::None);
    }

    #[tokio::test]
    async fn partial_failure_is_accumulated() {
        let h = harness_with(|s| s.deny("proj_abc12345_b.mp3"), None, CleanupConfig::default()).await;
        h.upload("proj_abc12345", "proj_abc12345_a.mp3", 1).await;
        h.upload("proj_abc12345", "proj_abc12345_b.mp3", 1).await;

        let result = h.coordinator.cleanup(CleanupRequest::new("proj_abc12345")).await.unwrap();
        assert_eq!(result.deleted_count, 1);
        assert_eq!(result.failed_count, 1);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].code, "AccessDenied");
        assert_eq!(result.failed_keys, vec!["proj_abc12345_b.mp3".to_string()]);
    }

    #[tokio::test]
    async fn confirmed_only_policy_keeps_rows_for_failed_keys() {
        let config = CleanupConfig {
            reconcile_policy: ReconcilePolicy::ConfirmedOnly,
            ..CleanupConfig::default()
        };
        let h = harness_with(|s| s.deny("proj_abc12345_b.mp3"), None, config).await;
        h.upload("proj_abc12345", "proj_abc12345_a.mp3", 1).await;
        h.upload("proj_abc12345", "proj_abc12345_b.mp3", 1).await;

        let result = h.coordinator.cleanup(CleanupRequest::new("proj_abc12345")).await.unwrap();
        assert_eq!(result.tracked_records_removed, 1);
        assert_eq!(h.tracked_rows("proj_abc12345").await, 1);
    }

    #[tokio::test]
    async fn dry_run_changes_nothing() {
        let h = harness().await;
        h.upload("proj_abc12345", "proj_abc12345_a.mp3", 5).await;
        h.upload("proj_abc12345", "proj_abc12345_b.mp3", 7).await;
        let before = h.store.list_all("").await.unwrap();

        let result = h
            .coordinator
            .cleanup(CleanupRequest::new("abc12345").dry_run(true))
            .await
            .unwrap();

        assert!(result.dry_run);
        assert_eq!(result.matched_objects.len(), 2);
        assert_eq!(result.matched_bytes(), 12);
        assert_eq!(result.attempted_count, 0);
        assert!(h.store.delete_calls().is_empty());
        assert_eq!(h.store.list_all("").await.unwrap(), before);
        assert_eq!(h.tracked_rows("proj_abc12345").await, 2);
    }

    #[tokio::test]
    async fn untracked_project_falls_back_to_patterns() {
        let h = harness().await;
        h.inner.put("audio/proj_abc12345/line.mp3", "x").unwrap();

        let result = h.coordinator.cleanup(CleanupRequest::new("proj_abc12345")).await.unwrap();
        assert_eq!(result.strategy_used, StrategyKind::PatternBased);
        assert_eq!(result.matched_objects.len(), 1);
        assert_eq!(result.matched_objects[0].key, "audio/proj_abc12345/line.mp3");
        assert_eq!(result.deleted_count, 1);
        assert!(h.inner.is_empty());
    }

    #[tokio::test]
    async fn pattern_strategy_is_skipped_when_records_exist() {
        let h = harness_with(|s| s.fail_batches(), None, CleanupConfig::default()).await;
        h.upload("proj_abc12345", "proj_abc12345_a.mp3", 1).await;
        h.inner.put("audio/proj_abc12345/extra.mp3", "x").unwrap();

        let result = h.coordinator.cleanup(CleanupRequest::new("proj_abc12345")).await.unwrap();
        assert_eq!(result.strategy_used, StrategyKind::TrackedFiles);
        assert_eq!(result.failed_count, 1);
        assert!(h.inner.keys().contains(&"audio/proj_abc12345/extra.mp3".to_string()));
    }

    #[tokio::test]
    async fn explicit_mode_runs_only_that_strategy() {
        let h = harness().await;
        h.upload("proj_abc12345", "proj_abc12345_a.mp3", 1).await;
        h.inner.put("audio/proj_abc12345/extra.mp3", "x").unwrap();

        let result = h
            .coordinator
            .cleanup(CleanupRequest::new("proj_abc12345").mode(StrategyMode::Pattern).dry_run(true))
            .await
            .unwrap();
        assert_eq!(result.strategy_used, StrategyKind::PatternBased);
        assert_eq!(result.matched_objects.len(), 2);

        let worker = h
            .coordinator
            .cleanup(CleanupRequest::new("proj_abc12345").mode(StrategyMode::Worker))
            .await
            .unwrap();
        assert_eq!(worker.strategy_used, StrategyKind::None);
        assert_eq!(h.inner.len(), 2);
    }

    #[tokio::test]
    async fn invalid_identifier_fails_fast() {
        let h = harness().await;
        let err = h.coordinator.cleanup(CleanupRequest::new("  ")).await.unwrap_err();
        assert!(matches!(err, CleanupError::InvalidProjectIdentifier(_)));
        let err = h
            .coordinator
            .cleanup(CleanupRequest::new("../etc/passwd"))
            .await
            .unwrap_err();
        assert!(matches!(err, CleanupError::InvalidProjectIdentifier(_)));
    }

    #[tokio::test]
    async fn unreachable_store_is_a_hard_failure() {
        let h = harness_with(|s| s.unreachable(), None, CleanupConfig::default()).await;
        let err = h.coordinator.cleanup(CleanupRequest::new("proj_abc12345")).await.unwrap_err();
        assert!(matches!(err, CleanupError::ObjectStoreUnavailable(_)));

        h.tracker
            .record("proj_abc12345", "proj_abc12345_a.mp3", NewTrackedFile::default())
            .await
            .unwrap();
        let err = h.coordinator.cleanup(CleanupRequest::new("proj_abc12345")).await.unwrap_err();
        assert!(matches!(err, CleanupError::ObjectStoreUnavailable(_)));
        assert_eq!(h.tracked_rows("proj_abc12345").await, 1);
    }

    #[tokio::test]
    async fn cancelled_run_returns_partial_result() {
        let cancel = CancellationToken::new();
        let config = CleanupConfig {
            batch_size: 2,
            delete_concurrency: 1,
            ..CleanupConfig::default()
        };
        let token = cancel.clone();
        let h = harness_with(move |s| s.cancel_after(1, token), None, config).await;
        for i in 0..6 {
            h.upload("proj_abc12345", &format!("proj_abc12345_{i}.mp3"), 1).await;
        }

        let mut request = CleanupRequest::new("proj_abc12345");
        request.cancel = cancel;
        let result = h.coordinator.cleanup(request).await.unwrap();

        assert!(result.cancelled);
        assert_eq!(result.deleted_count, 2);
        assert_eq!(result.skipped_count, 4);
        assert_eq!(result.tracked_records_removed, 2);
        assert_eq!(h.tracked_rows("proj_abc12345").await, 4);
    }

    #[tokio::test]
    async fn worker_handles_tracked_keys_when_enabled() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "total": 2, "successful": 1, "failed": 0,
                "results": [{ "key": "proj_abc12345_a.mp3", "success": true }]
            })))
            .expect(1)
            .mount(&server)
            .await;
        let worker = RemoteWorkerDelegate::new(&WorkerConfig {
            enabled: true,
            url: Some(server.uri()),
            token: None,
            timeout_secs: 5,
        })
        .unwrap();
        let h = harness_with(|s| s, Some(worker), CleanupConfig::default()).await;
        h.upload("proj_abc12345", "proj_abc12345_a.mp3", 1).await;
        h.upload("proj_abc12345", "proj_abc12345_b.mp3", 1).await;

        let result = h.coordinator.cleanup(CleanupRequest::new("proj_abc12345")).await.unwrap();
        assert_eq!(result.strategy_used, StrategyKind::RemoteWorker);
        assert_eq!(result.deleted_count, 1);
        assert_eq!(result.failed_count, 1);
        assert_eq!(result.errors[0].code, "WorkerNoResult");
        assert!(h.store.delete_calls().is_empty());
    }

    #[tokio::test]
    async fn worker_failure_falls_back_to_tracked_deletion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let worker = RemoteWorkerDelegate::new(&WorkerConfig {
            enabled: true,
            url: Some(server.uri()),
            token: None,
            timeout_secs: 5,
        })
        .unwrap();
        let h = harness_with(|s| s, Some(worker), CleanupConfig::default()).await;
        assert_eq!(
            h.coordinator.strategy_order(),
            vec![StrategyKind::RemoteWorker, StrategyKind::TrackedFiles, StrategyKind::PatternBased]
        );
        h.upload("proj_abc12345", "proj_abc12345_a.mp3", 1).await;

        let result = h.coordinator.cleanup(CleanupRequest::new("proj_abc12345")).await.unwrap();
        assert_eq!(result.strategy_used, StrategyKind::TrackedFiles);
        assert_eq!(result.deleted_count, 1);
        assert!(h.inner.is_empty());
    }

    #[tokio::test]
    async fn disabled_worker_only_runs_when_asked_for() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "total": 1, "successful": 1, "failed": 0,
                "results": [{ "key": "proj_abc12345_a.mp3", "success": true }]
            })))
            .expect(1)
            .mount(&server)
            .await;
        let worker = RemoteWorkerDelegate::new(&WorkerConfig {
            enabled: false,
            url: Some(server.uri()),
            token: None,
            timeout_secs: 5,
        })
        .unwrap();
        let h = harness_with(|s| s, Some(worker), CleanupConfig::default()).await;
        assert_eq!(
            h.coordinator.strategy_order(),
            vec![StrategyKind::TrackedFiles, StrategyKind::PatternBased]
        );

        h.upload("proj_abc12345", "proj_abc12345_a.mp3", 1).await;
        let result = h
            .coordinator
            .cleanup(CleanupRequest::new("proj_abc12345").mode(StrategyMode::Worker))
            .await
            .unwrap();
        assert_eq!(result.strategy_used, StrategyKind::RemoteWorker);
        assert_eq!(result.deleted_count, 1);
        assert!(h.store.delete_calls().is_empty());

        h.upload("proj_abc12345", "proj_abc12345_b.mp3", 1).await;
        let result = h.coordinator.cleanup(CleanupRequest::new("proj_abc12345")).await.unwrap();
        assert_eq!(result.strategy_used, StrategyKind::TrackedFiles);
        assert_eq!(result.deleted_count, 1);
        assert!(!h.store.delete_calls().is_empty());
    }
}
