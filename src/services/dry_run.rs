//! DryRunReporter: what a cleanup would touch, without touching anything.

use futures::{StreamExt, stream};
use serde::Serialize;
use std::{collections::HashSet, sync::Arc};
use tracing::{info, instrument, warn};

use crate::{
    models::{deletion::DeletionResult, project::ProjectIdentifier},
    services::{
        deletion_coordinator::{CleanupError, CleanupRequest, DeletionCoordinator},
        discovery::{DiscoveryReport, PatternDiscoveryEngine},
        file_tracker::FileRecordTracker,
        object_store::ObjectStoreClient,
    },
};

/// Audit of one project's storage footprint.
#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub project: ProjectIdentifier,
    pub tracked_count: usize,
    pub discovery: DiscoveryReport,
    /// Discovered in the store but absent from the tracker.
    pub untracked_keys: Vec<String>,
    /// Tracked but no longer present in the store.
    pub missing_tracked_keys: Vec<String>,
    /// Tracked keys whose existence could not be checked.
    pub unverified_tracked_keys: Vec<String>,
    /// The coordinator's dry-run result.
    pub plan: DeletionResult,
}

pub struct DryRunReporter {
    store: Arc<dyn ObjectStoreClient>,
    tracker: FileRecordTracker,
    discovery: Arc<PatternDiscoveryEngine>,
    coordinator: Arc<DeletionCoordinator>,
    check_concurrency: usize,
}

impl DryRunReporter {
    pub fn new(
        store: Arc<dyn ObjectStoreClient>,
        tracker: FileRecordTracker,
        discovery: Arc<PatternDiscoveryEngine>,
        coordinator: Arc<DeletionCoordinator>,
        check_concurrency: usize,
    ) -> Self {
        Self {
            store,
            tracker,
            discovery,
            coordinator,
            check_concurrency: check_concurrency.max(1),
        }
    }

    #[instrument(skip(self))]
    pub async fn audit(&self, project_id: &str, allow_full_scan: bool) -> Result<AuditReport, CleanupError> {
        let project = ProjectIdentifier::normalize(project_id)?;
        let tracked = self.tracker.list_by_project(&project).await?;
        let discovery = self.discovery.discover(&project, allow_full_scan).await?;

        let tracked_keys: HashSet<&str> = tracked.iter().map(|r| r.object_key.as_str()).collect();
        let untracked_keys: Vec<String> = discovery
            .objects
            .iter()
            .filter(|o| !tracked_keys.contains(o.key.as_str()))
            .map(|o| o.key.clone())
            .collect();

        let mut unique_tracked: Vec<String> = tracked_keys.iter().map(|k| k.to_string()).collect();
        unique_tracked.sort();
        let checks = stream::iter(unique_tracked)
            .map(|key| async move {
                let exists = self.store.exists(&key).await;
                (key, exists)
            })
            .buffer_unordered(self.check_concurrency)
            .collect::<Vec<_>>()
            .await;

        let mut missing_tracked_keys = Vec::new();
        let mut unverified_tracked_keys = Vec::new();
        for (key, exists) in checks {
            match exists {
                Ok(true) => {}
                Ok(false) => missing_tracked_keys.push(key),
                Err(err) => {
                    warn!(key = %key, error = %err, "Could not check tracked key");
                    unverified_tracked_keys.push(key);
                }
            }
        }
        missing_tracked_keys.sort();
        unverified_tracked_keys.sort();

        let plan = self
            .coordinator
            .cleanup(
                CleanupRequest::new(project_id)
                    .dry_run(true)
                    .allow_full_scan(allow_full_scan),
            )
            .await?;

        info!(
            tracked = tracked.len(),
            discovered = discovery.objects.len(),
            untracked = untracked_keys.len(),
            missing = missing_tracked_keys.len(),
            "DRY RUN: audit finished"
        );
        Ok(AuditReport {
            project,
            tracked_count: tracked.len(),
            discovery,
            untracked_keys,
            missing_tracked_keys,
            unverified_tracked_keys,
            plan,
        })
    }
}
