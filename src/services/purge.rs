//! Whole-bucket purge as a pollable background job.

use chrono::Utc;
use futures::StreamExt;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    models::{
        deletion::{DeletionAccumulator, MatchedObject, StrategyKind},
        job::{JobState, PurgeJob},
        object::ListRequest,
    },
    services::{
        batch_deleter::{BatchDeleter, RunControl},
        file_tracker::FileRecordTracker,
        job_store::{JobStore, JobStoreError},
        object_store::{ObjectStoreClient, ObjectStoreExt},
    },
};

#[derive(Clone)]
pub struct PurgeService {
    store: Arc<dyn ObjectStoreClient>,
    tracker: FileRecordTracker,
    jobs: Arc<dyn JobStore>,
    deleter: BatchDeleter,
}

impl PurgeService {
    pub fn new(
        store: Arc<dyn ObjectStoreClient>,
        tracker: FileRecordTracker,
        jobs: Arc<dyn JobStore>,
        deleter: BatchDeleter,
    ) -> Self {
        Self {
            store,
            tracker,
            jobs,
            deleter,
        }
    }

    /// Create a pending job and run it in the background.
    pub async fn start(&self, dry_run: bool) -> Result<Uuid, JobStoreError> {
        let job = PurgeJob::new(dry_run);
        self.jobs.insert(&job).await?;
        let id = job.id;
        info!(job_id = %id, dry_run, "Purge job queued");

        let service = self.clone();
        tokio::spawn(async move {
            service.run(job).await;
        });
        Ok(id)
    }

    pub async fn status(&self, id: Uuid) -> Result<Option<PurgeJob>, JobStoreError> {
        self.jobs.get(id).await
    }

    async fn run(&self, mut job: PurgeJob) {
        job.state = JobState::Running;
        job.started_at = Some(Utc::now());
        self.save(&job).await;

        match self.purge(&mut job).await {
            Ok(()) => {
                job.state = JobState::Completed;
                info!(
                    job_id = %job.id,
                    scanned = job.progress.scanned_count,
                    deleted = job.progress.deleted_count,
                    failed = job.progress.failed_count,
                    bytes_freed = job.progress.bytes_freed,
                    "Purge job completed"
                );
            }
            Err(message) => {
                job.state = JobState::Failed;
                error!(job_id = %job.id, error = %message, "Purge job failed");
                job.error = Some(message);
            }
        }
        job.finished_at = Some(Utc::now());
        self.save(&job).await;
    }

    /// Walk the bucket page by page, deleting each page before the next.
    async fn purge(&self, job: &mut PurgeJob) -> Result<(), String> {
        let control = RunControl::default();
        let mut pages = self.store.list_pages(ListRequest::prefix(""));

        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| e.to_string())?;
            job.progress.scanned_count += page.objects.len() as u64;
            if job.dry_run {
                job.progress.bytes_freed += page.objects.iter().map(|o| o.size).sum::<u64>();
                self.save(job).await;
                continue;
            }

            let keys: Vec<String> = page.objects.iter().map(|o| o.key.clone()).collect();
            let mut acc = DeletionAccumulator::new("*", false, StrategyKind::None);
            acc.set_matched(
                page.objects
                    .iter()
                    .map(|o| MatchedObject::from_summary(o, Vec::new()))
                    .collect(),
            );
            let summary = self.deleter.delete(&keys, &control, &mut acc).await;
            if summary.store_unreachable() {
                return Err("object store became unreachable during purge".into());
            }
            let result = acc.finish();
            job.progress.deleted_count += result.deleted_count as u64;
            job.progress.failed_count += result.failed_count as u64;
            job.progress.bytes_freed += result.total_bytes_freed;
            self.save(job).await;
        }

        if !job.dry_run {
            let removed = self.tracker.delete_all().await.map_err(|e| e.to_string())?;
            job.progress.tracked_records_removed = removed;
        }
        Ok(())
    }

    async fn save(&self, job: &PurgeJob) {
        if let Err(err) = self.jobs.update(job).await {
            warn!(job_id = %job.id, error = %err, "Failed to persist purge job state");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::test_pool,
        models::{project::ProjectIdentifier, tracked_file::NewTrackedFile},
        services::{job_store::MemoryJobStore, memory_store::MemoryObjectStore, test_support::FaultyStore},
    };
    use std::time::Duration;

    struct Harness {
        inner: Arc<MemoryObjectStore>,
        tracker: FileRecordTracker,
        service: PurgeService,
    }

    async fn harness(wrap: impl FnOnce(FaultyStore) -> FaultyStore) -> Harness {
        let inner = Arc::new(MemoryObjectStore::new());
        let store: Arc<dyn ObjectStoreClient> = Arc::new(wrap(FaultyStore::new(inner.clone()).with_page_size(3)));
        let tracker = FileRecordTracker::new(Arc::new(test_pool().await));
        let service = PurgeService::new(
            store.clone(),
            tracker.clone(),
            Arc::new(MemoryJobStore::new()),
            BatchDeleter::new(store, 1000, 2),
        );
        Harness {
            inner,
            tracker,
            service,
        }
    }

    async fn wait_for(service: &PurgeService, id: Uuid) -> PurgeJob {
        for _ in 0..200 {
            let job = service.status(id).await.unwrap().unwrap();
            if job.state.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("purge job {id} did not finish");
    }

    #[tokio::test]
    async fn purge_empties_bucket_and_tracker() {
        let h = harness(|s| s).await;
        for i in 0..7 {
            h.inner.put(format!("k{i}"), "abcd").unwrap();
        }
        h.tracker
            .record("proj_abc12345", "k0", NewTrackedFile::default())
            .await
            .unwrap();

        let id = h.service.start(false).await.unwrap();
        let job = wait_for(&h.service, id).await;

        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.progress.scanned_count, 7);
        assert_eq!(job.progress.deleted_count, 7);
        assert_eq!(job.progress.bytes_freed, 28);
        assert_eq!(job.progress.tracked_records_removed, 1);
        assert!(job.started_at.is_some() && job.finished_at.is_some());
        assert!(h.inner.is_empty());
        assert_eq!(
            h.tracker
                .count_by_project(&ProjectIdentifier::normalize("proj_abc12345").unwrap())
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn dry_run_purge_only_counts() {
        let h = harness(|s| s).await;
        for i in 0..5 {
            h.inner.put(format!("k{i}"), "ab").unwrap();
        }
        let id = h.service.start(true).await.unwrap();
        let job = wait_for(&h.service, id).await;

        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.progress.scanned_count, 5);
        assert_eq!(job.progress.deleted_count, 0);
        assert_eq!(job.progress.bytes_freed, 10);
        assert_eq!(h.inner.len(), 5);
    }

    #[tokio::test]
    async fn unreachable_store_fails_the_job() {
        let h = harness(|s| s.unreachable()).await;
        let id = h.service.start(false).await.unwrap();
        let job = wait_for(&h.service, id).await;
        assert_eq!(job.state, JobState::Failed);
        assert!(job.error.unwrap().contains("unavailable"));
    }
}
