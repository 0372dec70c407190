//! The ordered deletion strategies tried by the coordinator.
//!
//! Each strategy either produces a result or declines with `Ok(None)`, in
//! which case the next one is tried.

use async_trait::async_trait;
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
};
use tracing::{info, warn};

use crate::{
    config::ReconcilePolicy,
    models::{
        deletion::{DeletionAccumulator, DeletionResult, MatchedObject, StrategyKind},
        object::DeletionErrorEntry,
        project::ProjectIdentifier,
        tracked_file::TrackedFileRecord,
    },
    services::{
        batch_deleter::{BatchDeleter, RunControl},
        deletion_coordinator::CleanupError,
        discovery::PatternDiscoveryEngine,
        file_tracker::FileRecordTracker,
        remote_worker::RemoteWorkerDelegate,
    },
};

/// Label carried by candidates that came from tracked records.
pub const TRACKED_LABEL: &str = "tracked";

/// Synthetic code for keys the remote worker did not report on.
pub const WORKER_NO_RESULT: &str = "WorkerNoResult";

/// Synthetic code for keys the remote worker reported as failed.
pub const WORKER_FAILED: &str = "WorkerDeleteFailed";

/// Everything a strategy needs for one run.
pub struct CleanupContext {
    pub project: ProjectIdentifier,
    pub dry_run: bool,
    pub allow_full_scan: bool,
    /// Set when the caller named this strategy explicitly.
    pub forced: bool,
    pub control: RunControl,
    pub tracked: Vec<TrackedFileRecord>,
}

impl CleanupContext {
    /// Tracked keys, deduplicated, in insertion order.
    pub fn tracked_candidates(&self) -> Vec<MatchedObject> {
        let mut seen = HashSet::new();
        self.tracked
            .iter()
            .filter(|r| seen.insert(r.object_key.as_str()))
            .map(|r| MatchedObject {
                key: r.object_key.clone(),
                size: r.size_bytes.max(0) as u64,
                labels: vec![TRACKED_LABEL.to_string()],
            })
            .collect()
    }
}

fn tracked_counts(matched: &[MatchedObject]) -> BTreeMap<String, usize> {
    BTreeMap::from([(TRACKED_LABEL.to_string(), matched.len())])
}

#[async_trait]
pub trait DeletionStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    async fn attempt(&self, ctx: &CleanupContext) -> Result<Option<DeletionResult>, CleanupError>;
}

/// Removes tracker rows after a deletion run.
#[derive(Clone)]
pub struct Reconciler {
    tracker: FileRecordTracker,
    policy: ReconcilePolicy,
}

impl Reconciler {
    pub fn new(tracker: FileRecordTracker, policy: ReconcilePolicy) -> Self {
        Self { tracker, policy }
    }

    /// Apply the reconcile policy. A cancelled run only drops confirmed keys
    /// so rows for never-attempted objects survive for the next run.
    ///
    /// Failures are logged; the deletion result stands.
    pub async fn reconcile(&self, ctx: &CleanupContext, acc: &mut DeletionAccumulator, cancelled: bool) {
        if ctx.tracked.is_empty() {
            return;
        }
        let outcome = match (self.policy, cancelled) {
            (ReconcilePolicy::All, false) => self.tracker.delete_by_project(&ctx.project).await,
            _ => {
                let confirmed = acc.deleted_keys().to_vec();
                self.tracker.delete_keys(&ctx.project, &confirmed).await
            }
        };
        match outcome {
            Ok(removed) => {
                info!(project_id = %ctx.project.with_prefix, removed, "Reconciled tracked records");
                acc.set_tracked_records_removed(removed);
            }
            Err(err) => {
                warn!(project_id = %ctx.project.with_prefix, error = %err, "Failed to reconcile tracked records");
            }
        }
    }
}

/// Hands the tracked key list to the external worker.
pub struct RemoteWorkerStrategy {
    worker: RemoteWorkerDelegate,
    reconciler: Reconciler,
}

impl RemoteWorkerStrategy {
    pub fn new(worker: RemoteWorkerDelegate, reconciler: Reconciler) -> Self {
        Self { worker, reconciler }
    }
}

#[async_trait]
impl DeletionStrategy for RemoteWorkerStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::RemoteWorker
    }

    async fn attempt(&self, ctx: &CleanupContext) -> Result<Option<DeletionResult>, CleanupError> {
        let matched = ctx.tracked_candidates();
        if matched.is_empty() {
            return Ok(None);
        }
        let project_id = ctx.project.with_prefix.as_str();
        let counts = tracked_counts(&matched);
        if ctx.dry_run {
            info!(project_id, candidates = matched.len(), "DRY RUN: worker would delete tracked keys");
            return Ok(Some(DeletionResult::planned(project_id, self.kind(), matched, counts)));
        }
        if ctx.control.should_stop() {
            let mut acc = DeletionAccumulator::new(project_id, false, self.kind());
            acc.record_skipped(matched.len());
            acc.set_matched(matched);
            return Ok(Some(acc.finish()));
        }

        let keys: Vec<String> = matched.iter().map(|m| m.key.clone()).collect();
        let response = match self.worker.delete_keys(&keys).await {
            Ok(response) => response,
            Err(err) => {
                warn!(project_id, error = %err, "Remote worker failed; falling back");
                return Ok(None);
            }
        };

        let mut acc = DeletionAccumulator::new(project_id, false, self.kind());
        acc.set_matched(matched);
        acc.strategy_counts = counts;
        let mut results: HashMap<String, (bool, Option<String>)> = HashMap::new();
        for r in response.results {
            results.entry(r.key).or_insert((r.success, r.error));
        }
        for key in keys {
            match results.remove(&key) {
                Some((true, _)) => acc.record_deleted(key),
                Some((false, error)) => acc.record_failed(DeletionErrorEntry::new(
                    key,
                    WORKER_FAILED,
                    error.unwrap_or_else(|| "worker reported failure".into()),
                )),
                None => acc.record_failed(DeletionErrorEntry::new(
                    key,
                    WORKER_NO_RESULT,
                    "key absent from the worker response",
                )),
            }
        }

        self.reconciler.reconcile(ctx, &mut acc, false).await;
        Ok(Some(acc.finish()))
    }
}

/// Deletes exactly the keys the tracker knows about.
pub struct TrackedFilesStrategy {
    deleter: BatchDeleter,
    reconciler: Reconciler,
}

impl TrackedFilesStrategy {
    pub fn new(deleter: BatchDeleter, reconciler: Reconciler) -> Self {
        Self { deleter, reconciler }
    }
}

#[async_trait]
impl DeletionStrategy for TrackedFilesStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::TrackedFiles
    }

    async fn attempt(&self, ctx: &CleanupContext) -> Result<Option<DeletionResult>, CleanupError> {
        let matched = ctx.tracked_candidates();
        if matched.is_empty() {
            return Ok(None);
        }
        let project_id = ctx.project.with_prefix.as_str();
        let counts = tracked_counts(&matched);
        if ctx.dry_run {
            info!(project_id, candidates = matched.len(), "DRY RUN: would delete tracked keys");
            return Ok(Some(DeletionResult::planned(project_id, self.kind(), matched, counts)));
        }

        let keys: Vec<String> = matched.iter().map(|m| m.key.clone()).collect();
        let mut acc = DeletionAccumulator::new(project_id, false, self.kind());
        acc.set_matched(matched);
        acc.strategy_counts = counts;

        let summary = self.deleter.delete(&keys, &ctx.control, &mut acc).await;
        if summary.store_unreachable() {
            return Err(CleanupError::ObjectStoreUnavailable(
                "every delete batch failed to reach the store".into(),
            ));
        }

        self.reconciler
            .reconcile(ctx, &mut acc, summary.batches_skipped > 0)
            .await;
        Ok(Some(acc.finish()))
    }
}

/// Falls back to heuristic discovery when nothing is tracked.
pub struct PatternStrategy {
    discovery: Arc<PatternDiscoveryEngine>,
    deleter: BatchDeleter,
    tracker: FileRecordTracker,
}

impl PatternStrategy {
    pub fn new(
        discovery: Arc<PatternDiscoveryEngine>,
        deleter: BatchDeleter,
        tracker: FileRecordTracker,
    ) -> Self {
        Self {
            discovery,
            deleter,
            tracker,
        }
    }
}

#[async_trait]
impl DeletionStrategy for PatternStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::PatternBased
    }

    async fn attempt(&self, ctx: &CleanupContext) -> Result<Option<DeletionResult>, CleanupError> {
        if !ctx.tracked.is_empty() && !ctx.forced {
            return Ok(None);
        }
        let project_id = ctx.project.with_prefix.as_str();
        let report = self
            .discovery
            .discover(&ctx.project, ctx.allow_full_scan)
            .await?;
        if report.is_empty() {
            info!(project_id, "Pattern discovery found nothing");
            return Ok(None);
        }
        if ctx.dry_run {
            info!(project_id, candidates = report.objects.len(), "DRY RUN: would delete discovered keys");
            return Ok(Some(DeletionResult::planned(
                project_id,
                self.kind(),
                report.objects,
                report.strategy_counts,
            )));
        }

        let keys = report.keys();
        let mut acc = DeletionAccumulator::new(project_id, false, self.kind());
        acc.set_matched(report.objects);
        acc.strategy_counts = report.strategy_counts;

        let summary = self.deleter.delete(&keys, &ctx.control, &mut acc).await;
        if summary.store_unreachable() {
            return Err(CleanupError::ObjectStoreUnavailable(
                "every delete batch failed to reach the store".into(),
            ));
        }

        // Only reached with tracked rows when the mode was forced.
        if !ctx.tracked.is_empty() && !acc.deleted_keys().is_empty() {
            let confirmed = acc.deleted_keys().to_vec();
            match self.tracker.delete_keys(&ctx.project, &confirmed).await {
                Ok(removed) => acc.set_tracked_records_removed(removed),
                Err(err) => warn!(project_id, error = %err, "Failed to reconcile tracked records"),
            }
        }
        Ok(Some(acc.finish()))
    }
}
