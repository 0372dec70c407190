//! Persistence for purge job state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool, types::Json};
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::job::{JobState, PurgeJob, PurgeProgress};

#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error("job store persistence error: {0}")]
    Persistence(#[from] sqlx::Error),
    #[error("job {0} not found")]
    NotFound(Uuid),
    #[error("stored job is corrupt: {0}")]
    Corrupt(String),
}

pub type JobStoreResult<T> = Result<T, JobStoreError>;

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: &PurgeJob) -> JobStoreResult<()>;

    /// Overwrite an existing job.
    async fn update(&self, job: &PurgeJob) -> JobStoreResult<()>;

    async fn get(&self, id: Uuid) -> JobStoreResult<Option<PurgeJob>>;
}

/// Process-local job state; lost on restart.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<Uuid, PurgeJob>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: &PurgeJob) -> JobStoreResult<()> {
        self.jobs.write().await.insert(job.id, job.clone());
        Ok(())
    }

    async fn update(&self, job: &PurgeJob) -> JobStoreResult<()> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&job.id) {
            Some(existing) => {
                *existing = job.clone();
                Ok(())
            }
            None => Err(JobStoreError::NotFound(job.id)),
        }
    }

    async fn get(&self, id: Uuid) -> JobStoreResult<Option<PurgeJob>> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }
}

#[derive(FromRow)]
struct PurgeJobRow {
    id: String,
    state: String,
    dry_run: bool,
    progress: Json<PurgeProgress>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl TryFrom<PurgeJobRow> for PurgeJob {
    type Error = JobStoreError;

    fn try_from(row: PurgeJobRow) -> Result<Self, Self::Error> {
        Ok(PurgeJob {
            id: Uuid::parse_str(&row.id).map_err(|e| JobStoreError::Corrupt(e.to_string()))?,
            state: row.state.parse::<JobState>().map_err(JobStoreError::Corrupt)?,
            dry_run: row.dry_run,
            progress: row.progress.0,
            error: row.error,
            created_at: row.created_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
        })
    }
}

/// Job state in the `purge_jobs` table, shared by every instance using the database.
#[derive(Clone)]
pub struct SqliteJobStore {
    db: Arc<SqlitePool>,
}

impl SqliteJobStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn insert(&self, job: &PurgeJob) -> JobStoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO purge_jobs (id, state, dry_run, progress, error, created_at, started_at, finished_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job.id.to_string())
        .bind(job.state.as_str())
        .bind(job.dry_run)
        .bind(Json(&job.progress))
        .bind(&job.error)
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.finished_at)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    async fn update(&self, job: &PurgeJob) -> JobStoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE purge_jobs
            SET state = ?, progress = ?, error = ?, started_at = ?, finished_at = ?
            WHERE id = ?
            "#,
        )
        .bind(job.state.as_str())
        .bind(Json(&job.progress))
        .bind(&job.error)
        .bind(job.started_at)
        .bind(job.finished_at)
        .bind(job.id.to_string())
        .execute(&*self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(JobStoreError::NotFound(job.id));
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> JobStoreResult<Option<PurgeJob>> {
        let row = sqlx::query_as::<_, PurgeJobRow>(
            r#"
            SELECT id, state, dry_run, progress, error, created_at, started_at, finished_at
            FROM purge_jobs WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&*self.db)
        .await?;

        row.map(PurgeJob::try_from).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    async fn exercise(store: &dyn JobStore) {
        let mut job = PurgeJob::new(true);
        store.insert(&job).await.unwrap();
        assert_eq!(store.get(job.id).await.unwrap().unwrap().state, JobState::Pending);

        job.state = JobState::Completed;
        job.progress.scanned_count = 42;
        job.finished_at = Some(Utc::now());
        store.update(&job).await.unwrap();

        let loaded = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(loaded.state, JobState::Completed);
        assert_eq!(loaded.progress.scanned_count, 42);
        assert!(loaded.dry_run);
        assert!(loaded.finished_at.is_some());

        assert!(store.get(Uuid::new_v4()).await.unwrap().is_none());
        assert!(matches!(
            store.update(&PurgeJob::new(false)).await,
            Err(JobStoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn memory_store_round_trips_jobs() {
        exercise(&MemoryJobStore::new()).await;
    }

    #[tokio::test]
    async fn sqlite_store_round_trips_jobs() {
        exercise(&SqliteJobStore::new(Arc::new(test_pool().await))).await;
    }
}
